// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Agent groups and their trash.
//!
//! A group belongs to one agent controller and may only contain agents of that controller.
//! Deleting a group moves it into the trash unless the deletion is ultimate, restoring it requires
//! the controller to still exist.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool, sqlite::SqliteRow};

use crate::{
    acl::{Permission, ResourceKind},
    context::Context,
    error::{EntityError, EntityResult},
    scanners,
    sync::{BulkBuffer, Reconcile},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentGroup {
    pub uuid: String,
    pub name: String,
    pub comment: String,
    pub owner: Option<String>,
    pub scanner: String,
    /// UUIDs of the member agents.
    pub agents: Vec<String>,
}

impl From<SqliteRow> for AgentGroup {
    fn from(row: SqliteRow) -> Self {
        Self {
            uuid: row.get("uuid"),
            name: row.get("name"),
            comment: row.get("comment"),
            owner: row.get("owner"),
            scanner: row.get("scanner"),
            agents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewAgentGroup {
    pub name: String,
    pub comment: String,
    pub scanner: String,
    pub agents: Vec<String>,
}

/// Changes to a group; `None` keeps the stored value, `Some` agents replace the membership set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentGroupChanges {
    pub name: Option<String>,
    pub comment: Option<String>,
    pub agents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Live,
    Trash,
}

impl Location {
    fn groups(&self) -> &'static str {
        match self {
            Location::Live => "agent_groups",
            Location::Trash => "agent_groups_trash",
        }
    }

    fn members(&self) -> &'static str {
        match self {
            Location::Live => "agent_group_agents",
            Location::Trash => "agent_group_agents_trash",
        }
    }
}

fn owner(ctx: &Context) -> Option<&str> {
    Some(ctx.principal.uuid.as_str()).filter(|uuid| !uuid.is_empty())
}

/// Members in their given order without duplicates.
pub(crate) fn unique_members(agents: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = HashSet::new();
    agents
        .iter()
        .map(String::as_str)
        .filter(move |agent| seen.insert(*agent))
}

/// Verifies that every agent exists and is reported by `scanner`.
pub(crate) async fn validate_members(
    conn: &mut SqliteConnection,
    scanner: &str,
    agents: &[String],
) -> EntityResult<()> {
    for agent in unique_members(agents) {
        let owning: Option<String> = sqlx::query_scalar("SELECT scanner FROM agents WHERE uuid = ?")
            .bind(agent)
            .fetch_optional(&mut *conn)
            .await?;
        match owning {
            None => return Err(EntityError::not_found(ResourceKind::Agent, agent)),
            Some(owning) if owning != scanner => {
                return Err(EntityError::mismatch(ResourceKind::Agent, agent, scanner));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

async fn find(
    conn: &mut SqliteConnection,
    location: Location,
    uuid: &str,
) -> Result<Option<AgentGroup>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT uuid, name, comment, owner, scanner FROM {} WHERE uuid = ?",
        location.groups()
    ))
    .bind(uuid)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(mut group) = row.map(AgentGroup::from) else {
        return Ok(None);
    };
    group.agents = sqlx::query_scalar(&format!(
        "SELECT agent_uuid FROM {} WHERE group_uuid = ? ORDER BY rowid",
        location.members()
    ))
    .bind(uuid)
    .fetch_all(&mut *conn)
    .await?;
    Ok(Some(group))
}

async fn insert_members(
    conn: &mut SqliteConnection,
    group: &str,
    agents: &[String],
) -> Result<u64, sqlx::Error> {
    let mut members = BulkBuffer::new(AgentGroup::CHILDREN, 0);
    for agent in unique_members(agents) {
        members.push(conn, vec![group.into(), agent.into()]).await?;
    }
    members.flush(conn).await?;
    Ok(members.written())
}

/// Creates a group and returns its UUID.
pub async fn create_agent_group(
    pool: &SqlitePool,
    ctx: &Context,
    group: &NewAgentGroup,
) -> EntityResult<String> {
    if group.name.is_empty() {
        return Err(EntityError::Missing("name"));
    }
    if !ctx.may(ResourceKind::AgentGroup, "", Permission::Create) {
        return Err(EntityError::permission_denied(ResourceKind::AgentGroup, ""));
    }
    let mut tx = pool.begin().await?;
    scanners::readable_agent_controller(&mut tx, ctx, &group.scanner).await?;
    validate_members(&mut tx, &group.scanner, &group.agents).await?;

    let uuid = ctx.ids.generate();
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO agent_groups (uuid, name, comment, owner, scanner, creation_time, modification_time)
        VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&uuid)
    .bind(&group.name)
    .bind(&group.comment)
    .bind(owner(ctx))
    .bind(&group.scanner)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    insert_members(&mut tx, &uuid, &group.agents).await?;
    tx.commit().await?;
    tracing::debug!(%uuid, scanner = %group.scanner, "created agent group");
    Ok(uuid)
}

pub async fn modify_agent_group(
    pool: &SqlitePool,
    ctx: &Context,
    uuid: &str,
    changes: &AgentGroupChanges,
) -> EntityResult<()> {
    if uuid.is_empty() {
        return Err(EntityError::Missing("agent_group_id"));
    }
    if changes.name.as_deref() == Some("") {
        return Err(EntityError::Missing("name"));
    }
    let mut tx = pool.begin().await?;
    let group = find(&mut tx, Location::Live, uuid)
        .await?
        .ok_or_else(|| EntityError::not_found(ResourceKind::AgentGroup, uuid))?;
    if !ctx.may(ResourceKind::AgentGroup, uuid, Permission::Modify) {
        return Err(EntityError::permission_denied(ResourceKind::AgentGroup, uuid));
    }
    if let Some(agents) = &changes.agents {
        validate_members(&mut tx, &group.scanner, agents).await?;
    }

    sqlx::query(
        r#"
        UPDATE agent_groups
        SET name = COALESCE(?, name), comment = COALESCE(?, comment), modification_time = ?
        WHERE uuid = ?"#,
    )
    .bind(changes.name.as_deref())
    .bind(changes.comment.as_deref())
    .bind(chrono::Utc::now().timestamp())
    .bind(uuid)
    .execute(&mut *tx)
    .await?;
    if let Some(agents) = &changes.agents {
        sqlx::query("DELETE FROM agent_group_agents WHERE group_uuid = ?")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
        insert_members(&mut tx, uuid, agents).await?;
    }
    tx.commit().await?;
    tracing::debug!(uuid, "modified agent group");
    Ok(())
}

/// Moves a group into the trash, or removes it for good when `ultimate` is set.
///
/// A group that is already in the trash is only removed when `ultimate` is set, otherwise the
/// call succeeds without changes.
pub async fn delete_agent_group(
    pool: &SqlitePool,
    ctx: &Context,
    uuid: &str,
    ultimate: bool,
) -> EntityResult<()> {
    if uuid.is_empty() {
        return Err(EntityError::Missing("agent_group_id"));
    }
    let mut tx = pool.begin().await?;
    let location = if find(&mut tx, Location::Live, uuid).await?.is_some() {
        Location::Live
    } else if find(&mut tx, Location::Trash, uuid).await?.is_some() {
        Location::Trash
    } else {
        return Err(EntityError::not_found(ResourceKind::AgentGroup, uuid));
    };
    if !ctx.may(ResourceKind::AgentGroup, uuid, Permission::Delete) {
        return Err(EntityError::permission_denied(ResourceKind::AgentGroup, uuid));
    }

    match (location, ultimate) {
        (Location::Trash, false) => return Ok(()),
        (location, true) => {
            sqlx::query(&format!("DELETE FROM {} WHERE uuid = ?", location.groups()))
                .bind(uuid)
                .execute(&mut *tx)
                .await?;
        }
        (Location::Live, false) => {
            sqlx::query("DELETE FROM agent_groups_trash WHERE uuid = ?")
                .bind(uuid)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r#"
                INSERT INTO agent_groups_trash
                    (uuid, name, comment, owner, scanner, creation_time, modification_time)
                SELECT uuid, name, comment, owner, scanner, creation_time, ?
                FROM agent_groups WHERE uuid = ?"#,
            )
            .bind(chrono::Utc::now().timestamp())
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"
                INSERT INTO agent_group_agents_trash (group_uuid, agent_uuid)
                SELECT group_uuid, agent_uuid FROM agent_group_agents WHERE group_uuid = ?"#,
            )
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM agent_groups WHERE uuid = ?")
                .bind(uuid)
                .execute(&mut *tx)
                .await?;
        }
    }
    tx.commit().await?;
    tracing::debug!(uuid, ultimate, "deleted agent group");
    Ok(())
}

/// Moves a trashed group back, its scanner must still be an agent controller.
pub async fn restore_agent_group(pool: &SqlitePool, ctx: &Context, uuid: &str) -> EntityResult<()> {
    let mut tx = pool.begin().await?;
    let group = find(&mut tx, Location::Trash, uuid)
        .await?
        .ok_or_else(|| EntityError::not_found(ResourceKind::AgentGroup, uuid))?;
    if !ctx.may(ResourceKind::AgentGroup, uuid, Permission::Restore) {
        return Err(EntityError::permission_denied(ResourceKind::AgentGroup, uuid));
    }
    let scanner = scanners::find(&mut tx, &group.scanner).await?;
    if !scanner.is_some_and(|scanner| scanner.is_agent_controller()) {
        return Err(EntityError::mismatch(
            ResourceKind::AgentGroup,
            uuid,
            &group.scanner,
        ));
    }
    if find(&mut tx, Location::Live, uuid).await?.is_some() {
        return Err(EntityError::mismatch(
            ResourceKind::AgentGroup,
            uuid,
            &group.scanner,
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO agent_groups (uuid, name, comment, owner, scanner, creation_time, modification_time)
        SELECT uuid, name, comment, owner, scanner, creation_time, ?
        FROM agent_groups_trash WHERE uuid = ?"#,
    )
    .bind(chrono::Utc::now().timestamp())
    .bind(uuid)
    .execute(&mut *tx)
    .await?;
    insert_members(&mut tx, uuid, &group.agents).await?;
    sqlx::query("DELETE FROM agent_groups_trash WHERE uuid = ?")
        .bind(uuid)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::debug!(uuid, "restored agent group");
    Ok(())
}

/// Removes all trashed groups owned by the principal and returns their number.
pub async fn empty_agent_group_trash(pool: &SqlitePool, ctx: &Context) -> EntityResult<u64> {
    if !ctx.may(ResourceKind::AgentGroup, "", Permission::Delete) {
        return Err(EntityError::permission_denied(ResourceKind::AgentGroup, ""));
    }
    let result = sqlx::query("DELETE FROM agent_groups_trash WHERE owner IS ?")
        .bind(owner(ctx))
        .execute(pool)
        .await?;
    tracing::debug!(removed = result.rows_affected(), "emptied agent group trash");
    Ok(result.rows_affected())
}

pub async fn get_agent_group(pool: &SqlitePool, uuid: &str) -> EntityResult<AgentGroup> {
    let mut conn = pool.acquire().await?;
    find(&mut conn, Location::Live, uuid)
        .await?
        .ok_or_else(|| EntityError::not_found(ResourceKind::AgentGroup, uuid))
}

/// Lists live groups, or trashed ones when `trash` is set.
pub async fn get_agent_groups(pool: &SqlitePool, trash: bool) -> EntityResult<Vec<AgentGroup>> {
    let location = if trash {
        Location::Trash
    } else {
        Location::Live
    };
    let rows = sqlx::query(&format!(
        "SELECT uuid, name, comment, owner, scanner FROM {} ORDER BY name, uuid",
        location.groups()
    ))
    .fetch_all(pool)
    .await?;
    let mut members: HashMap<String, Vec<String>> = HashMap::new();
    for row in sqlx::query(&format!(
        "SELECT group_uuid, agent_uuid FROM {} ORDER BY rowid",
        location.members()
    ))
    .fetch_all(pool)
    .await?
    {
        members
            .entry(row.get("group_uuid"))
            .or_default()
            .push(row.get("agent_uuid"));
    }
    Ok(rows
        .into_iter()
        .map(AgentGroup::from)
        .map(|mut group| {
            group.agents = members.remove(&group.uuid).unwrap_or_default();
            group
        })
        .collect())
}
