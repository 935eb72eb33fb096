// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Access to the agents known by an agent controller.

use std::{io, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::{agents::Agent, scanners::Scanner};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait AgentControllerClient: Send + Sync {
    /// Returns the agents currently reported by `scanner`.
    async fn agents(&self, scanner: &Scanner) -> Result<Vec<Agent>, ControllerError>;
}

/// Reads agent lists exported by controllers into `<directory>/<scanner-uuid>.json`.
///
/// A missing file means that the controller does not report any agents yet.
#[derive(Debug, Clone)]
pub struct SnapshotDirectory {
    directory: PathBuf,
}

impl SnapshotDirectory {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path(&self, scanner: &Scanner) -> PathBuf {
        self.directory.join(format!("{}.json", scanner.uuid))
    }
}

#[async_trait]
impl AgentControllerClient for SnapshotDirectory {
    async fn agents(&self, scanner: &Scanner) -> Result<Vec<Agent>, ControllerError> {
        let path = self.path(scanner);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::trace!(path = %path.display(), "no snapshot");
                return Ok(Vec::new());
            }
            Err(source) => return Err(ControllerError::Io { path, source }),
        };
        let mut agents: Vec<Agent> = serde_json::from_slice(&content)
            .map_err(|source| ControllerError::Parse {
                path: path.clone(),
                source,
            })?;
        for agent in agents.iter_mut() {
            agent.scanner = scanner.uuid.clone();
            agent.owner = scanner.owner.clone();
        }
        tracing::debug!(path = %path.display(), agents = agents.len(), "read snapshot");
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanners::AGENT_CONTROLLER;

    fn scanner() -> Scanner {
        Scanner {
            uuid: "scanner-1".into(),
            name: "controller".into(),
            owner: Some("user-1".into()),
            scanner_type: AGENT_CONTROLLER.into(),
        }
    }

    #[tokio::test]
    async fn missing_snapshot_has_no_agents() {
        let dir = tempfile::tempdir().unwrap();
        let client = SnapshotDirectory::new(dir.path());
        assert!(client.agents(&scanner()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reads_agents_of_the_scanner() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("scanner-1.json"),
            r#"[
                {"agent_id": "agent-1", "hostname": "host-1", "ip_addresses": ["10.0.0.1"]},
                {"agent_id": "agent-2", "authorized": true, "scanner": "ignored"}
            ]"#,
        )
        .unwrap();
        let agents = SnapshotDirectory::new(dir.path())
            .agents(&scanner())
            .await
            .unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].ip_addresses, vec!["10.0.0.1"]);
        assert!(agents[1].authorized);
        assert!(agents.iter().all(|a| a.scanner == "scanner-1"));
        assert_eq!(agents[0].owner.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn broken_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scanner-1.json"), "{").unwrap();
        let error = SnapshotDirectory::new(dir.path())
            .agents(&scanner())
            .await
            .unwrap_err();
        assert!(matches!(error, ControllerError::Parse { .. }));
    }
}
