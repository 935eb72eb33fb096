// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};

use super::{Reconcile, Stored, Table, Value};
use crate::{
    acl::ResourceKind,
    agent_groups::{self, AgentGroup},
    context::Context,
    error::{EntityError, EntityResult},
    scanners,
};

#[async_trait]
impl Reconcile for AgentGroup {
    const KIND: ResourceKind = ResourceKind::AgentGroup;
    const PARENT: Table = Table {
        name: "agent_groups",
        columns: &[
            "uuid",
            "name",
            "comment",
            "owner",
            "scanner",
            "creation_time",
            "modification_time",
        ],
    };
    const CHILDREN: Table = Table {
        name: "agent_group_agents",
        columns: &["group_uuid", "agent_uuid"],
    };

    fn key(&self) -> &str {
        &self.uuid
    }

    fn uuid(&self) -> Option<&str> {
        Some(&self.uuid)
    }

    async fn validate(&self, conn: &mut SqliteConnection, ctx: &Context) -> EntityResult<()> {
        if self.uuid.is_empty() {
            return Err(EntityError::Missing("agent_group"));
        }
        scanners::readable_agent_controller(conn, ctx, &self.scanner).await?;
        agent_groups::validate_members(conn, &self.scanner, &self.agents).await
    }

    async fn find_stored(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Option<Stored>, sqlx::Error> {
        let row = sqlx::query("SELECT uuid, scanner FROM agent_groups WHERE uuid = ?")
            .bind(&self.uuid)
            .fetch_optional(conn)
            .await?;
        Ok(row.map(|row| Stored {
            uuid: row.get("uuid"),
            scanner: row.get("scanner"),
        }))
    }

    fn check_stored(&self, stored: &Stored) -> EntityResult<()> {
        if stored.scanner != self.scanner {
            return Err(EntityError::mismatch(
                ResourceKind::AgentGroup,
                &self.uuid,
                &self.scanner,
            ));
        }
        Ok(())
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        stored: &Stored,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE agent_groups
            SET name = ?, comment = ?, modification_time = ?
            WHERE uuid = ?"#,
        )
        .bind(&self.name)
        .bind(&self.comment)
        .bind(now)
        .bind(&stored.uuid)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn delete_children(
        &self,
        conn: &mut SqliteConnection,
        stored: &Stored,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM agent_group_agents WHERE group_uuid = ?")
            .bind(&stored.uuid)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// A group reported again by its controller supersedes a trashed copy.
    async fn prepare_insert(
        &self,
        conn: &mut SqliteConnection,
        uuid: &str,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query("DELETE FROM agent_groups_trash WHERE uuid = ?")
            .bind(uuid)
            .execute(conn)
            .await?;
        if result.rows_affected() > 0 {
            tracing::debug!(uuid, "dropped trashed copy of reported agent group");
        }
        Ok(())
    }

    fn row(&self, uuid: &str, now: i64) -> Vec<Value> {
        vec![
            uuid.into(),
            self.name.as_str().into(),
            self.comment.as_str().into(),
            self.owner.as_deref().into(),
            self.scanner.as_str().into(),
            now.into(),
            now.into(),
        ]
    }

    fn child_rows(&self, uuid: &str) -> Vec<Vec<Value>> {
        agent_groups::unique_members(&self.agents)
            .map(|agent| vec![uuid.into(), agent.into()])
            .collect()
    }
}
