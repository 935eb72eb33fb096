// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use sqlx::{Row, SqliteConnection, SqlitePool, sqlite::SqliteRow};

use crate::{
    acl::{Permission, ResourceKind},
    context::Context,
    error::{EntityError, EntityResult},
};

/// Type of scanners managing agents.
pub const AGENT_CONTROLLER: &str = "agent-controller";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scanner {
    pub uuid: String,
    pub name: String,
    pub owner: Option<String>,
    pub scanner_type: String,
}

impl Scanner {
    pub fn is_agent_controller(&self) -> bool {
        self.scanner_type == AGENT_CONTROLLER
    }
}

impl From<SqliteRow> for Scanner {
    fn from(row: SqliteRow) -> Self {
        Self {
            uuid: row.get("uuid"),
            name: row.get("name"),
            owner: row.get("owner"),
            scanner_type: row.get("scanner_type"),
        }
    }
}

pub async fn find(conn: &mut SqliteConnection, uuid: &str) -> Result<Option<Scanner>, sqlx::Error> {
    let row = sqlx::query("SELECT uuid, name, owner, scanner_type FROM scanners WHERE uuid = ?")
        .bind(uuid)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Scanner::from))
}

pub async fn agent_controllers(pool: &SqlitePool) -> Result<Vec<Scanner>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT uuid, name, owner, scanner_type FROM scanners WHERE scanner_type = ? ORDER BY uuid",
    )
    .bind(AGENT_CONTROLLER)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Scanner::from).collect())
}

/// Looks up an agent controller the principal of `ctx` may read.
pub async fn readable_agent_controller(
    conn: &mut SqliteConnection,
    ctx: &Context,
    uuid: &str,
) -> EntityResult<Scanner> {
    if uuid.is_empty() {
        return Err(EntityError::Missing("scanner"));
    }
    let scanner = find(conn, uuid)
        .await?
        .filter(Scanner::is_agent_controller)
        .ok_or_else(|| EntityError::not_found(ResourceKind::Scanner, uuid))?;
    if !ctx.may(ResourceKind::Scanner, uuid, Permission::Get) {
        return Err(EntityError::permission_denied(ResourceKind::Scanner, uuid));
    }
    Ok(scanner)
}
