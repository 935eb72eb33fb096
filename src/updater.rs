// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Periodic synchronization of the agents reported by agent controllers.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    config::AgentSync,
    context::Context,
    controller::{AgentControllerClient, ControllerError},
    error::EntityError,
    ipc::{Admission, IpcError, Permit, Resource, timeout_secs},
    scanners::{self, Scanner},
    sync::{Summary, Synchronizer},
};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("admission control failed: {0}")]
    Admission(#[from] IpcError),
    #[error("waiting for admission failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Sync(#[from] EntityError),
}

impl From<sqlx::Error> for UpdateError {
    fn from(value: sqlx::Error) -> Self {
        Self::Sync(EntityError::Internal(value))
    }
}

pub struct Updater<C> {
    synchronizer: Synchronizer,
    client: C,
    admission: Arc<dyn Admission>,
    ctx: Context,
    settings: AgentSync,
}

impl<C> Updater<C>
where
    C: AgentControllerClient,
{
    pub fn new(
        synchronizer: Synchronizer,
        client: C,
        admission: Arc<dyn Admission>,
        ctx: Context,
        settings: AgentSync,
    ) -> Self {
        Self {
            synchronizer,
            client,
            admission,
            ctx,
            settings,
        }
    }

    /// Synchronizes a single controller.
    ///
    /// Returns `None` when no scan update slot became free within the configured timeout.
    pub async fn update_scanner(&self, scanner: &Scanner) -> Result<Option<Summary>, UpdateError> {
        let admission = self.admission.clone();
        let timeout = timeout_secs(self.settings.permit_timeout);
        let permit = tokio::task::spawn_blocking(move || {
            Permit::acquire(admission, Resource::ScanUpdate, timeout)
        })
        .await??;
        let Some(_permit) = permit else {
            tracing::debug!(scanner = %scanner.uuid, "no scan update slot available, skipping");
            return Ok(None);
        };

        let agents = self.client.agents(scanner).await?;
        let summary = self.synchronizer.sync_batch(&self.ctx, &agents).await?;
        Ok(Some(summary))
    }

    /// Synchronizes every agent controller once and returns the number of updated controllers.
    ///
    /// A failing controller does not prevent the others from being updated.
    pub async fn update_once(&self) -> Result<usize, UpdateError> {
        let controllers = scanners::agent_controllers(self.synchronizer.pool()).await?;
        let mut updated = 0;
        for scanner in controllers.iter() {
            match self.update_scanner(scanner).await {
                Ok(Some(_)) => updated += 1,
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(scanner = %scanner.uuid, %error, "agent update failed");
                }
            }
        }
        Ok(updated)
    }

    /// Runs [`Updater::update_once`] every poll interval, forever.
    pub async fn run(&self) {
        let period = self.settings.poll_interval.max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(?period, "agent updater started");
        loop {
            interval.tick().await;
            match self.update_once().await {
                Ok(updated) => tracing::debug!(updated, "agent update cycle finished"),
                Err(error) => tracing::warn!(%error, "agent update cycle failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::query_scalar;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        controller::SnapshotDirectory,
        ipc::{Limits, LocalSemaphores},
        test_utils,
    };

    struct Setup {
        updater: Updater<SnapshotDirectory>,
        admission: Arc<LocalSemaphores>,
        snapshots: tempfile::TempDir,
    }

    async fn setup() -> Setup {
        let pool = test_utils::pool().await;
        test_utils::insert_agent_controller(&pool, "scanner-1").await;
        test_utils::insert_agent_controller(&pool, "scanner-2").await;
        let snapshots = tempfile::tempdir().unwrap();
        let admission = Arc::new(LocalSemaphores::new(&Limits::default()));
        let settings = AgentSync {
            permit_timeout: Duration::from_secs(1),
            snapshots: snapshots.path().to_owned(),
            ..Default::default()
        };
        let updater = Updater::new(
            Synchronizer::new(pool, settings.flush_threshold),
            SnapshotDirectory::new(&settings.snapshots),
            admission.clone(),
            test_utils::context(),
            settings,
        );
        Setup {
            updater,
            admission,
            snapshots,
        }
    }

    fn write_snapshot(s: &Setup, scanner: &str, content: &str) {
        std::fs::write(s.snapshots.path().join(format!("{scanner}.json")), content).unwrap();
    }

    async fn agents(s: &Setup) -> i64 {
        query_scalar("SELECT COUNT(*) FROM agents")
            .fetch_one(s.updater.synchronizer.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn synchronizes_all_controllers() {
        let s = setup().await;
        write_snapshot(
            &s,
            "scanner-1",
            r#"[{"agent_id": "agent-1", "ip_addresses": ["10.0.0.1"]}]"#,
        );
        write_snapshot(&s, "scanner-2", r#"[{"agent_id": "agent-2"}]"#);

        assert_eq!(s.updater.update_once().await.unwrap(), 2);
        assert_eq!(agents(&s).await, 2);
        assert_eq!(s.updater.update_once().await.unwrap(), 2);
        assert_eq!(agents(&s).await, 2);
        assert_eq!(s.admission.value(Resource::ScanUpdate).unwrap(), 1);
    }

    #[tokio::test]
    async fn busy_slot_skips_the_controller() {
        let s = setup().await;
        write_snapshot(&s, "scanner-1", r#"[{"agent_id": "agent-1"}]"#);
        let held = Permit::acquire(s.admission.clone(), Resource::ScanUpdate, 1)
            .unwrap()
            .unwrap();

        let scanner = Scanner {
            uuid: "scanner-1".into(),
            name: "scanner-1".into(),
            owner: None,
            scanner_type: scanners::AGENT_CONTROLLER.into(),
        };
        assert!(s.updater.update_scanner(&scanner).await.unwrap().is_none());
        assert_eq!(agents(&s).await, 0);

        drop(held);
        let summary = s.updater.update_scanner(&scanner).await.unwrap().unwrap();
        assert_eq!(summary.inserted, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn failing_controller_does_not_stop_the_cycle() {
        let s = setup().await;
        write_snapshot(&s, "scanner-1", "not json");
        write_snapshot(&s, "scanner-2", r#"[{"agent_id": "agent-2"}]"#);

        assert_eq!(s.updater.update_once().await.unwrap(), 1);
        assert_eq!(agents(&s).await, 1);
        assert!(logs_contain("agent update failed"));
        assert_eq!(s.admission.value(Resource::ScanUpdate).unwrap(), 1);
    }
}
