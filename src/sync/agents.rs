// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};

use super::{Reconcile, Stored, Table, Value};
use crate::{
    acl::ResourceKind,
    agents::Agent,
    context::Context,
    error::{EntityError, EntityResult},
    scanners,
};

#[async_trait]
impl Reconcile for Agent {
    const KIND: ResourceKind = ResourceKind::Agent;
    const PARENT: Table = Table {
        name: "agents",
        columns: &[
            "uuid",
            "agent_id",
            "name",
            "hostname",
            "authorized",
            "min_interval",
            "heartbeat_interval",
            "connection_status",
            "last_update",
            "last_updater_heartbeat",
            "config",
            "comment",
            "owner",
            "scanner",
            "creation_time",
            "modification_time",
        ],
    };
    const CHILDREN: Table = Table {
        name: "agent_ip_addresses",
        columns: &["agent_id", "ip_address"],
    };

    fn key(&self) -> &str {
        &self.agent_id
    }

    fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    async fn validate(&self, conn: &mut SqliteConnection, ctx: &Context) -> EntityResult<()> {
        if self.agent_id.is_empty() {
            return Err(EntityError::Missing("agent_id"));
        }
        scanners::readable_agent_controller(conn, ctx, &self.scanner).await?;
        Ok(())
    }

    async fn find_stored(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Option<Stored>, sqlx::Error> {
        let row = sqlx::query("SELECT uuid, scanner FROM agents WHERE agent_id = ?")
            .bind(&self.agent_id)
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
                ResourceKind::Agent,
                &self.agent_id,
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
            UPDATE agents
            SET name = ?, hostname = ?, authorized = ?, min_interval = ?,
                heartbeat_interval = ?, connection_status = ?, last_update = ?,
                last_updater_heartbeat = ?, config = ?, comment = ?, modification_time = ?
            WHERE uuid = ?"#,
        )
        .bind(self.display_name())
        .bind(&self.hostname)
        .bind(self.authorized)
        .bind(self.min_interval)
        .bind(self.heartbeat_interval)
        .bind(&self.connection_status)
        .bind(self.last_update)
        .bind(self.last_updater_heartbeat)
        .bind(&self.config)
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
        _: &Stored,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM agent_ip_addresses WHERE agent_id = ?")
            .bind(&self.agent_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    fn row(&self, uuid: &str, now: i64) -> Vec<Value> {
        vec![
            uuid.into(),
            self.agent_id.as_str().into(),
            self.display_name().into(),
            self.hostname.as_str().into(),
            self.authorized.into(),
            self.min_interval.into(),
            self.heartbeat_interval.into(),
            self.connection_status.as_str().into(),
            self.last_update.into(),
            self.last_updater_heartbeat.into(),
            self.config.as_str().into(),
            self.comment.as_str().into(),
            self.owner.as_deref().into(),
            self.scanner.as_str().into(),
            now.into(),
            now.into(),
        ]
    }

    fn child_rows(&self, _: &str) -> Vec<Vec<Value>> {
        let mut seen = HashSet::new();
        self.ip_addresses
            .iter()
            .filter(|ip| seen.insert(ip.as_str()))
            .map(|ip| vec![self.agent_id.as_str().into(), ip.as_str().into()])
            .collect()
    }
}
