// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Helpers shared by the tests of this crate.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use sqlx::SqlitePool;

use crate::{
    acl::{AccessControl, AllowAll, Permission, Principal, ResourceKind},
    context::{Context, IdGenerator},
    database::SqliteConfiguration,
    scanners::AGENT_CONTROLLER,
};

/// Generates `id-1`, `id-2`, ...
#[derive(Debug, Default)]
pub struct SequentialIds(AtomicUsize);

impl IdGenerator for SequentialIds {
    fn generate(&self) -> String {
        format!("id-{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Denies everything matching the given command or resource id, allows the rest.
#[derive(Debug, Default)]
pub struct Deny {
    command: Option<String>,
    id: Option<String>,
}

impl Deny {
    pub fn command(command: &str) -> Self {
        Self {
            command: Some(command.to_owned()),
            id: None,
        }
    }

    pub fn id(id: &str) -> Self {
        Self {
            command: None,
            id: Some(id.to_owned()),
        }
    }
}

impl AccessControl for Deny {
    fn may(&self, _: &Principal, kind: ResourceKind, id: &str, permission: Permission) -> bool {
        let command = permission.command(kind);
        self.command.as_deref() != Some(command.as_str()) && self.id.as_deref() != Some(id)
    }
}

pub fn context() -> Context {
    context_as("")
}

pub fn context_as(principal: &str) -> Context {
    Context::new(
        Principal::new(principal),
        Arc::new(AllowAll),
        Arc::new(SequentialIds::default()),
    )
}

pub fn context_with(access: Deny) -> Context {
    Context::new(
        Principal::new("user-1"),
        Arc::new(access),
        Arc::new(SequentialIds::default()),
    )
}

pub async fn pool() -> SqlitePool {
    SqliteConfiguration::in_memory().setup().await.unwrap()
}

pub async fn insert_agent_controller(pool: &SqlitePool, uuid: &str) {
    sqlx::query("INSERT INTO scanners (uuid, name, scanner_type) VALUES (?, ?, ?)")
        .bind(uuid)
        .bind(uuid)
        .bind(AGENT_CONTROLLER)
        .execute(pool)
        .await
        .unwrap();
}

/// Inserts an agent of `scanner` and returns its UUID, `uuid-<agent_id>`.
pub async fn insert_agent(pool: &SqlitePool, scanner: &str, agent_id: &str, ips: &[&str]) -> String {
    let uuid = format!("uuid-{agent_id}");
    sqlx::query(
        r#"
        INSERT INTO agents (uuid, agent_id, name, hostname, scanner, creation_time, modification_time)
        VALUES (?, ?, ?, ?, ?, 0, 0)"#,
    )
    .bind(&uuid)
    .bind(agent_id)
    .bind(agent_id)
    .bind(format!("{agent_id}.local"))
    .bind(scanner)
    .execute(pool)
    .await
    .unwrap();
    for ip in ips {
        sqlx::query("INSERT INTO agent_ip_addresses (agent_id, ip_address) VALUES (?, ?)")
            .bind(agent_id)
            .bind(*ip)
            .execute(pool)
            .await
            .unwrap();
    }
    uuid
}
