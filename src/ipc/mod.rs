// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Admission control for concurrency limited work.
//!
//! A small set of counting semaphores bounds how many scan updates, database connections and
//! report processing jobs may run at the same time. [`SemaphoreSet`] shares the counters between
//! all processes on the host, [`LocalSemaphores`] is used when every participant is a thread of the
//! same process.
//!
//! Every implementation follows the same contract as `semop(2)`:
//! - a negative delta acquires and blocks until the counter can be decremented,
//! - a positive delta releases,
//! - a delta of zero blocks until the counter reaches zero.
//!
//! The timeout is given in seconds, `0` blocks indefinitely. A timeout is reported as
//! [`Outcome::TimedOut`] and is not an error.

mod error;
pub mod local;
pub mod sysv;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use error::{IpcError, Step};
pub use local::LocalSemaphores;
pub use sysv::SemaphoreSet;

/// A concurrency limited resource.
///
/// The discriminant is the index of the counter within a semaphore set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    ScanUpdate = 0,
    DatabaseConnection = 1,
    ReportProcessing = 2,
}

impl Resource {
    pub const ALL: [Resource; 3] = [
        Resource::ScanUpdate,
        Resource::DatabaseConnection,
        Resource::ReportProcessing,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Limit used when none is configured.
    pub fn default_limit(self) -> u16 {
        match self {
            Resource::ScanUpdate => 1,
            Resource::DatabaseConnection => 50,
            Resource::ReportProcessing => 1,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Resource::ScanUpdate => "scan update",
            Resource::DatabaseConnection => "database connection",
            Resource::ReportProcessing => "report processing",
        };
        write!(f, "{name}")
    }
}

/// Highest value a System V semaphore counter can hold (`SEMVMX`).
pub const MAX_LIMIT: u16 = 32767;

/// Configured concurrency limits, `0` means the default of the resource.
///
/// Limits above [`MAX_LIMIT`] are lowered to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_scan_updates: u16,
    pub max_database_connections: u16,
    pub max_report_processing: u16,
}

impl Limits {
    pub fn get(&self, resource: Resource) -> u16 {
        let configured = match resource {
            Resource::ScanUpdate => self.max_scan_updates,
            Resource::DatabaseConnection => self.max_database_connections,
            Resource::ReportProcessing => self.max_report_processing,
        };
        match configured {
            0 => resource.default_limit(),
            configured => configured.min(MAX_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Adjusted,
    TimedOut,
}

pub trait Admission: Send + Sync {
    /// Adjusts the counter of `resource` by `delta`.
    ///
    /// Blocks for at most `timeout` seconds, `0` blocks until the operation can be performed.
    fn acquire_or_release(
        &self,
        resource: Resource,
        delta: i16,
        timeout: u64,
    ) -> Result<Outcome, IpcError>;

    /// Current value of the counter of `resource`.
    fn value(&self, resource: Resource) -> Result<i32, IpcError>;
}

/// A held slot of a resource, released on drop.
pub struct Permit<A>
where
    A: Admission + ?Sized,
{
    admission: Arc<A>,
    resource: Resource,
}

impl<A> Permit<A>
where
    A: Admission + ?Sized,
{
    /// Acquires one slot of `resource`.
    ///
    /// Returns `None` when no slot became available within `timeout` seconds.
    pub fn acquire(
        admission: Arc<A>,
        resource: Resource,
        timeout: u64,
    ) -> Result<Option<Self>, IpcError> {
        match admission.acquire_or_release(resource, -1, timeout)? {
            Outcome::Adjusted => Ok(Some(Self {
                admission,
                resource,
            })),
            Outcome::TimedOut => Ok(None),
        }
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }
}

impl<A> Drop for Permit<A>
where
    A: Admission + ?Sized,
{
    fn drop(&mut self) {
        if let Err(error) = self.admission.acquire_or_release(self.resource, 1, 0) {
            tracing::warn!(%error, resource = %self.resource, "unable to release permit");
        }
    }
}

impl<A> std::fmt::Debug for Permit<A>
where
    A: Admission + ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("resource", &self.resource)
            .finish()
    }
}

/// Converts a configured wait into the whole seconds understood by [`Admission`].
///
/// A zero duration waits forever, anything below a second waits one second.
pub fn timeout_secs(timeout: std::time::Duration) -> u64 {
    if timeout.is_zero() {
        0
    } else {
        timeout.as_secs().max(1)
    }
}
