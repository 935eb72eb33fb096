// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Agents reported by agent controllers.
//!
//! Agents are created and refreshed by the synchronizer, users can only authorize, tune or delete
//! them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool, sqlite::SqliteRow};

use crate::{
    acl::{Permission, ResourceKind},
    context::Context,
    error::{EntityError, EntityResult},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Agent {
    /// Local identifier, generated when the agent is first stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Identifier assigned by the agent controller.
    pub agent_id: String,
    pub name: String,
    pub hostname: String,
    pub authorized: bool,
    pub min_interval: i64,
    pub heartbeat_interval: i64,
    pub connection_status: String,
    pub last_update: i64,
    pub last_updater_heartbeat: i64,
    pub config: String,
    pub comment: String,
    pub owner: Option<String>,
    /// The agent controller reporting this agent.
    pub scanner: String,
    pub ip_addresses: Vec<String>,
}

impl Agent {
    /// Name used when the controller does not provide one.
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.hostname.is_empty() {
            &self.hostname
        } else {
            &self.agent_id
        }
    }
}

impl From<SqliteRow> for Agent {
    fn from(row: SqliteRow) -> Self {
        Self {
            uuid: Some(row.get("uuid")),
            agent_id: row.get("agent_id"),
            name: row.get("name"),
            hostname: row.get("hostname"),
            authorized: row.get("authorized"),
            min_interval: row.get("min_interval"),
            heartbeat_interval: row.get("heartbeat_interval"),
            connection_status: row.get("connection_status"),
            last_update: row.get("last_update"),
            last_updater_heartbeat: row.get("last_updater_heartbeat"),
            config: row.get("config"),
            comment: row.get("comment"),
            owner: row.get("owner"),
            scanner: row.get("scanner"),
            ip_addresses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentFilter {
    pub scanner: Option<String>,
    pub authorized: Option<bool>,
}

/// Changes requested by a user; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentChanges {
    pub authorized: Option<bool>,
    pub min_interval: Option<i64>,
    pub heartbeat_interval: Option<i64>,
    pub config: Option<String>,
    pub comment: Option<String>,
}

const SELECT_AGENTS: &str = r#"
    SELECT uuid, agent_id, name, hostname, authorized, min_interval, heartbeat_interval,
           connection_status, last_update, last_updater_heartbeat, config, comment, owner, scanner
    FROM agents
"#;

pub async fn get_agents(pool: &SqlitePool, filter: &AgentFilter) -> EntityResult<Vec<Agent>> {
    let rows = sqlx::query(&format!(
        r#"{SELECT_AGENTS}
        WHERE (?1 IS NULL OR scanner = ?1)
          AND (?2 IS NULL OR authorized = ?2)
        ORDER BY agent_id"#
    ))
    .bind(filter.scanner.as_deref())
    .bind(filter.authorized)
    .fetch_all(pool)
    .await?;
    let mut agents: Vec<Agent> = rows.into_iter().map(Agent::from).collect();

    let addresses = sqlx::query(
        r#"
        SELECT agent_id, ip_address
        FROM agent_ip_addresses
        WHERE (?1 IS NULL OR agent_id IN (SELECT agent_id FROM agents WHERE scanner = ?1))
        ORDER BY rowid"#,
    )
    .bind(filter.scanner.as_deref())
    .fetch_all(pool)
    .await?;
    let mut by_agent: HashMap<String, Vec<String>> = HashMap::new();
    for row in addresses {
        by_agent
            .entry(row.get("agent_id"))
            .or_default()
            .push(row.get("ip_address"));
    }
    for agent in agents.iter_mut() {
        agent.ip_addresses = by_agent.remove(&agent.agent_id).unwrap_or_default();
    }
    Ok(agents)
}

pub async fn get_agent(pool: &SqlitePool, uuid: &str) -> EntityResult<Agent> {
    let mut conn = pool.acquire().await?;
    let mut agent = find(&mut conn, uuid)
        .await?
        .ok_or_else(|| EntityError::not_found(ResourceKind::Agent, uuid))?;
    agent.ip_addresses = sqlx::query_scalar(
        "SELECT ip_address FROM agent_ip_addresses WHERE agent_id = ? ORDER BY rowid",
    )
    .bind(&agent.agent_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(agent)
}

pub(crate) async fn find(
    conn: &mut SqliteConnection,
    uuid: &str,
) -> Result<Option<Agent>, sqlx::Error> {
    let row = sqlx::query(&format!("{SELECT_AGENTS} WHERE uuid = ?"))
        .bind(uuid)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Agent::from))
}

/// Verifies that every agent exists and may be changed with `permission`.
async fn check_agents(
    conn: &mut SqliteConnection,
    ctx: &Context,
    uuids: &[String],
    permission: Permission,
) -> EntityResult<()> {
    if uuids.is_empty() {
        return Err(EntityError::Missing("agent_ids"));
    }
    for uuid in uuids {
        if find(conn, uuid).await?.is_none() {
            return Err(EntityError::not_found(ResourceKind::Agent, uuid));
        }
        if !ctx.may(ResourceKind::Agent, uuid, permission) {
            return Err(EntityError::permission_denied(ResourceKind::Agent, uuid));
        }
    }
    Ok(())
}

/// Applies `changes` to all listed agents, either all of them are changed or none.
pub async fn modify_agents(
    pool: &SqlitePool,
    ctx: &Context,
    uuids: &[String],
    changes: &AgentChanges,
) -> EntityResult<()> {
    let mut tx = pool.begin().await?;
    check_agents(&mut tx, ctx, uuids, Permission::Modify).await?;
    let now = chrono::Utc::now().timestamp();
    for uuid in uuids {
        sqlx::query(
            r#"
            UPDATE agents
            SET authorized = COALESCE(?, authorized),
                min_interval = COALESCE(?, min_interval),
                heartbeat_interval = COALESCE(?, heartbeat_interval),
                config = COALESCE(?, config),
                comment = COALESCE(?, comment),
                modification_time = ?
            WHERE uuid = ?"#,
        )
        .bind(changes.authorized)
        .bind(changes.min_interval)
        .bind(changes.heartbeat_interval)
        .bind(changes.config.as_deref())
        .bind(changes.comment.as_deref())
        .bind(now)
        .bind(uuid)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    tracing::debug!(count = uuids.len(), "modified agents");
    Ok(())
}

/// Deletes the listed agents together with their addresses and group memberships.
pub async fn delete_agents(pool: &SqlitePool, ctx: &Context, uuids: &[String]) -> EntityResult<()> {
    let mut tx = pool.begin().await?;
    check_agents(&mut tx, ctx, uuids, Permission::Delete).await?;
    for uuid in uuids {
        sqlx::query("DELETE FROM agents WHERE uuid = ?")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    tracing::debug!(count = uuids.len(), "deleted agents");
    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlx::query_scalar;

    use super::*;
    use crate::test_utils::{self, Deny};

    async fn setup() -> (SqlitePool, Vec<String>) {
        let pool = test_utils::pool().await;
        test_utils::insert_agent_controller(&pool, "scanner-1").await;
        test_utils::insert_agent_controller(&pool, "scanner-2").await;
        let uuids = vec![
            test_utils::insert_agent(&pool, "scanner-1", "agent-1", &["10.0.0.1", "10.0.0.2"])
                .await,
            test_utils::insert_agent(&pool, "scanner-2", "agent-2", &["10.0.0.3"]).await,
        ];
        (pool, uuids)
    }

    #[tokio::test]
    async fn lists_agents_with_addresses() {
        let (pool, _) = setup().await;
        let agents = get_agents(&pool, &AgentFilter::default()).await.unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].agent_id, "agent-1");
        assert_eq!(agents[0].ip_addresses, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(agents[1].ip_addresses, vec!["10.0.0.3"]);

        let filter = AgentFilter {
            scanner: Some("scanner-2".into()),
            ..Default::default()
        };
        let agents = get_agents(&pool, &filter).await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].agent_id, "agent-2");
    }

    #[tokio::test]
    async fn modifies_only_requested_fields() {
        let (pool, uuids) = setup().await;
        let changes = AgentChanges {
            authorized: Some(true),
            comment: Some("checked".into()),
            ..Default::default()
        };
        modify_agents(&pool, &test_utils::context(), &uuids[..1], &changes)
            .await
            .unwrap();

        let agent = get_agent(&pool, &uuids[0]).await.unwrap();
        assert!(agent.authorized);
        assert_eq!(agent.comment, "checked");
        assert_eq!(agent.hostname, "agent-1.local");
        let other = get_agent(&pool, &uuids[1]).await.unwrap();
        assert!(!other.authorized);

        let authorized = AgentFilter {
            authorized: Some(true),
            ..Default::default()
        };
        assert_eq!(get_agents(&pool, &authorized).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn modify_is_all_or_nothing() {
        let (pool, uuids) = setup().await;
        let targets = vec![uuids[0].clone(), "missing".to_owned()];
        let changes = AgentChanges {
            authorized: Some(true),
            ..Default::default()
        };
        let error = modify_agents(&pool, &test_utils::context(), &targets, &changes)
            .await
            .unwrap_err();
        assert!(matches!(error, EntityError::NotFound { kind: ResourceKind::Agent, .. }));
        assert!(!get_agent(&pool, &uuids[0]).await.unwrap().authorized);
    }

    #[tokio::test]
    async fn modify_requires_permission() {
        let (pool, uuids) = setup().await;
        let ctx = test_utils::context_with(Deny::command("modify_agent"));
        let error = modify_agents(&pool, &ctx, &uuids, &AgentChanges::default())
            .await
            .unwrap_err();
        assert_eq!(error.code(), 99);
    }

    #[tokio::test]
    async fn modify_without_agents_is_rejected() {
        let (pool, _) = setup().await;
        let error = modify_agents(&pool, &test_utils::context(), &[], &AgentChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(error, EntityError::Missing("agent_ids")));
    }

    #[tokio::test]
    async fn delete_removes_addresses() {
        let (pool, uuids) = setup().await;
        delete_agents(&pool, &test_utils::context(), &uuids[..1])
            .await
            .unwrap();

        assert!(matches!(
            get_agent(&pool, &uuids[0]).await,
            Err(EntityError::NotFound { .. })
        ));
        let addresses: i64 = query_scalar("SELECT COUNT(*) FROM agent_ip_addresses")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(addresses, 1);
    }

    #[test]
    fn display_name_falls_back() {
        let mut agent = Agent {
            agent_id: "id".into(),
            ..Default::default()
        };
        assert_eq!(agent.display_name(), "id");
        agent.hostname = "host".into();
        assert_eq!(agent.display_name(), "host");
        agent.name = "name".into();
        assert_eq!(agent.display_name(), "name");
    }
}
