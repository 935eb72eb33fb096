// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! SQLite connection pool and schema.

use std::{path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::{
    Sqlite, SqlitePool,
    migrate::Migrator,
    pool::PoolOptions,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
};

use crate::config::duration;

pub static MIGRATOR: Migrator = sqlx::migrate!("./src/database/migrations");

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub enum DBLocation {
    #[default]
    InMemory,
    File(PathBuf),
}

impl DBLocation {
    pub fn sqlite_address(&self) -> String {
        match self {
            Self::InMemory => "sqlite::memory:".to_owned(),
            Self::File(path) => format!("sqlite:{}", path.to_string_lossy()),
        }
    }
}

impl From<&str> for DBLocation {
    fn from(value: &str) -> Self {
        match value {
            "in-memory" => Self::InMemory,
            file => Self::File(file.into()),
        }
    }
}

// toml has no representation for File(PathBuf), a plain string reads better anyway
impl Serialize for DBLocation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::InMemory => serializer.serialize_str("in-memory"),
            Self::File(path) => serializer.serialize_str(&path.to_string_lossy()),
        }
    }
}

impl<'de> Deserialize<'de> for DBLocation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SqliteConfiguration {
    pub location: DBLocation,
    #[serde(
        deserialize_with = "duration::deserialize",
        serialize_with = "duration::serialize"
    )]
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl Default for SqliteConfiguration {
    fn default() -> Self {
        Self {
            location: Default::default(),
            busy_timeout: Duration::from_secs(2),
            max_connections: 5,
        }
    }
}

impl SqliteConfiguration {
    pub fn in_memory() -> Self {
        Self {
            location: DBLocation::InMemory,
            ..Default::default()
        }
    }

    /// Connects to the database without running migrations.
    pub async fn create_pool(&self) -> Result<SqlitePool, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&self.location.sqlite_address())?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(self.busy_timeout)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);
        let pool = match self.location {
            // every in-memory connection is a database of its own, so there must only ever be one
            // and it must never be closed
            DBLocation::InMemory => PoolOptions::<Sqlite>::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
            DBLocation::File(_) => {
                PoolOptions::<Sqlite>::new().max_connections(self.max_connections.max(1))
            }
        };
        pool.connect_with(options).await
    }

    /// Connects to the database and brings the schema up to date.
    pub async fn setup(&self) -> Result<SqlitePool, sqlx::Error> {
        let pool = self.create_pool().await?;
        MIGRATOR.run(&pool).await?;
        tracing::debug!(location = ?self.location, "database ready");
        Ok(pool)
    }
}
