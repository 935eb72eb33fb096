// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Reconciles snapshots reported by agent controllers into the database.
//!
//! A batch runs in a single transaction. Existing records are updated in place and their children
//! are replaced, new records are staged in a [`BulkBuffer`] and written with multi row inserts.
//! Buffers may flush before the end of the batch to bound memory, those flushes are statements of
//! the same transaction, so a failure anywhere rolls back the whole batch.

mod agent_groups;
mod agents;
mod buffer;

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

pub use buffer::{BulkBuffer, Table, Value};

use crate::{acl::ResourceKind, context::Context, error::EntityResult};

/// The persisted state of a record found by its natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub uuid: String,
    pub scanner: String,
}

/// A record that can be reconciled by the [`Synchronizer`].
#[async_trait]
pub trait Reconcile: Send + Sync {
    const KIND: ResourceKind;
    /// Table receiving new records, see [`Reconcile::row`].
    const PARENT: Table;
    /// Table receiving the children, see [`Reconcile::child_rows`].
    const CHILDREN: Table;

    /// Natural key used to probe for an existing record.
    fn key(&self) -> &str;

    /// Identifier provided by the source, if any.
    fn uuid(&self) -> Option<&str>;

    /// Checks references of the record, a failure aborts the batch.
    async fn validate(&self, conn: &mut SqliteConnection, ctx: &Context) -> EntityResult<()>;

    async fn find_stored(&self, conn: &mut SqliteConnection)
    -> Result<Option<Stored>, sqlx::Error>;

    /// Checks whether the stored record may be overwritten by this one.
    fn check_stored(&self, _stored: &Stored) -> EntityResult<()> {
        Ok(())
    }

    /// Overwrites all mutable fields of the stored record.
    async fn update(
        &self,
        conn: &mut SqliteConnection,
        stored: &Stored,
        now: i64,
    ) -> Result<(), sqlx::Error>;

    async fn delete_children(
        &self,
        conn: &mut SqliteConnection,
        stored: &Stored,
    ) -> Result<u64, sqlx::Error>;

    /// Called before a new record with `uuid` is staged.
    async fn prepare_insert(
        &self,
        _conn: &mut SqliteConnection,
        _uuid: &str,
    ) -> Result<(), sqlx::Error> {
        Ok(())
    }

    fn row(&self, uuid: &str, now: i64) -> Vec<Value>;

    /// Children of the record without duplicates.
    fn child_rows(&self, uuid: &str) -> Vec<Vec<Value>>;
}

/// Outcome of a successful batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub inserted: u64,
    pub updated: u64,
    pub children_inserted: u64,
    pub flushes: usize,
}

#[derive(Debug, Clone)]
pub struct Synchronizer {
    pool: SqlitePool,
    flush_threshold: usize,
}

impl Synchronizer {
    /// `flush_threshold` is the number of buffered bytes that triggers a bulk insert, `0` buffers
    /// until the end of the batch.
    pub fn new(pool: SqlitePool, flush_threshold: usize) -> Self {
        Self {
            pool,
            flush_threshold,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn sync_batch<R>(&self, ctx: &Context, records: &[R]) -> EntityResult<Summary>
    where
        R: Reconcile,
    {
        let mut tx = self.pool.begin().await?;
        match self.reconcile(&mut tx, ctx, records).await {
            Ok(summary) => {
                tx.commit().await?;
                tracing::info!(
                    kind = %R::KIND,
                    records = records.len(),
                    inserted = summary.inserted,
                    updated = summary.updated,
                    children = summary.children_inserted,
                    flushes = summary.flushes,
                    "synchronized batch"
                );
                Ok(summary)
            }
            Err(error) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(kind = %R::KIND, %rollback, "rollback failed");
                }
                tracing::warn!(
                    kind = %R::KIND,
                    records = records.len(),
                    %error,
                    "batch rolled back"
                );
                Err(error)
            }
        }
    }

    async fn reconcile<R>(
        &self,
        conn: &mut SqliteConnection,
        ctx: &Context,
        records: &[R],
    ) -> EntityResult<Summary>
    where
        R: Reconcile,
    {
        let now = chrono::Utc::now().timestamp();
        let mut parents = BulkBuffer::new(R::PARENT, self.flush_threshold);
        let mut children = BulkBuffer::new(R::CHILDREN, self.flush_threshold);
        let mut staged = HashSet::new();
        let mut summary = Summary::default();

        for record in records {
            record.validate(conn, ctx).await?;
            // a key repeated within the batch must see the rows staged for it
            if staged.contains(record.key()) {
                parents.flush(conn).await?;
                children.flush(conn).await?;
                staged.clear();
            }
            staged.insert(record.key().to_owned());
            match record.find_stored(conn).await? {
                Some(stored) => {
                    record.check_stored(&stored)?;
                    record.update(conn, &stored, now).await?;
                    let removed = record.delete_children(conn, &stored).await?;
                    tracing::trace!(kind = %R::KIND, key = record.key(), removed, "updated");
                    for row in record.child_rows(&stored.uuid) {
                        children.push(conn, row).await?;
                    }
                    summary.updated += 1;
                }
                None => {
                    let uuid = match record.uuid() {
                        Some(uuid) if !uuid.is_empty() => uuid.to_owned(),
                        _ => ctx.ids.generate(),
                    };
                    record.prepare_insert(conn, &uuid).await?;
                    parents.push(conn, record.row(&uuid, now)).await?;
                    for row in record.child_rows(&uuid) {
                        children.push(conn, row).await?;
                    }
                }
            }
        }
        parents.flush(conn).await?;
        children.flush(conn).await?;

        summary.inserted = parents.written();
        summary.children_inserted = children.written();
        summary.flushes = parents.flushes() + children.flushes();
        Ok(summary)
    }
}
