// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ArgAction;
use serde::{Deserialize, Serialize};

use crate::{
    database::SqliteConfiguration,
    ipc::{Limits, MAX_LIMIT},
};

pub mod duration;
pub mod logging;

pub use logging::Logging;

const DEFAULT_STATE_DIR: &str = "/var/lib/gvm/gvmd";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Semaphores {
    /// Directory containing the key file of the semaphore set.
    pub state_dir: PathBuf,
    #[serde(flatten)]
    pub limits: Limits,
}

impl Default for Semaphores {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            limits: Limits::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSync {
    /// Bytes buffered before a bulk insert is executed, `0` only flushes at the end of a batch.
    pub flush_threshold: usize,
    #[serde(
        deserialize_with = "duration::deserialize",
        serialize_with = "duration::serialize"
    )]
    pub poll_interval: Duration,
    /// How long to wait for a scan update slot, `0s` waits forever.
    #[serde(
        deserialize_with = "duration::deserialize",
        serialize_with = "duration::serialize"
    )]
    pub permit_timeout: Duration,
    /// Directory of agent controller snapshots named `<scanner-uuid>.json`.
    pub snapshots: PathBuf,
}

impl Default for AgentSync {
    fn default() -> Self {
        Self {
            flush_threshold: 1024 * 1024,
            poll_interval: Duration::from_secs(60),
            permit_timeout: Duration::from_secs(10),
            snapshots: Path::new(DEFAULT_STATE_DIR).join("agent-controllers"),
        }
    }
}

#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log: Logging,
    pub database: SqliteConfiguration,
    pub semaphores: Semaphores,
    pub sync: AgentSync,
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", toml::to_string_pretty(self).unwrap_or_default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "loading config");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = Vec::with_capacity(2);
        if let Some(home) = std::env::var_os("HOME") {
            locations.push(Path::new(&home).join(".config/gvmd/gvmd.toml"));
        }
        locations.push(PathBuf::from("/etc/gvmd/gvmd.toml"));
        locations
    }

    fn command() -> clap::Command {
        clap::Command::new("gvmd")
            .about("Greenbone vulnerability manager daemon")
            .arg(
                clap::Arg::new("config")
                    .short('c')
                    .long("config")
                    .env("GVMD_CONFIG")
                    .value_parser(clap::builder::PathBufValueParser::new())
                    .action(ArgAction::Set)
                    .help("path to toml config file"),
            )
            .arg(
                clap::Arg::new("log-level")
                    .long("log-level")
                    .env("GVMD_LOG_LEVEL")
                    .value_parser(|s: &str| s.parse::<tracing::Level>())
                    .action(ArgAction::Set)
                    .help("level of log messages (TRACE, DEBUG, INFO, WARN, ERROR)"),
            )
            .arg(
                clap::Arg::new("database")
                    .long("database")
                    .env("GVMD_DATABASE")
                    .action(ArgAction::Set)
                    .help("path to the sqlite database or 'in-memory'"),
            )
            .arg(
                clap::Arg::new("state-dir")
                    .long("state-dir")
                    .env("GVMD_STATE_DIR")
                    .value_parser(clap::builder::PathBufValueParser::new())
                    .action(ArgAction::Set)
                    .help("directory containing the semaphore key file"),
            )
            .arg(
                clap::Arg::new("max-scan-updates")
                    .long("max-scan-updates")
                    .env("GVMD_MAX_SCAN_UPDATES")
                    .value_parser(clap::value_parser!(u16).range(..=i64::from(MAX_LIMIT)))
                    .help("maximum of concurrent scan updates, 0 for the default"),
            )
            .arg(
                clap::Arg::new("max-database-connections")
                    .long("max-database-connections")
                    .env("GVMD_MAX_DATABASE_CONNECTIONS")
                    .value_parser(clap::value_parser!(u16).range(..=i64::from(MAX_LIMIT)))
                    .help("maximum of concurrent database connections, 0 for the default"),
            )
            .arg(
                clap::Arg::new("max-report-processing")
                    .long("max-report-processing")
                    .env("GVMD_MAX_REPORT_PROCESSING")
                    .value_parser(clap::value_parser!(u16).range(..=i64::from(MAX_LIMIT)))
                    .help("maximum of concurrently processed reports, 0 for the default"),
            )
            .arg(
                clap::Arg::new("agent-snapshots")
                    .long("agent-snapshots")
                    .env("GVMD_AGENT_SNAPSHOTS")
                    .value_parser(clap::builder::PathBufValueParser::new())
                    .action(ArgAction::Set)
                    .help("directory of agent controller snapshots"),
            )
            .arg(
                clap::Arg::new("agent-poll-interval")
                    .long("agent-poll-interval")
                    .env("GVMD_AGENT_POLL_INTERVAL")
                    .value_parser(clap::value_parser!(u64))
                    .value_name("SECONDS")
                    .help("interval to synchronize agents in seconds"),
            )
    }

    fn apply(&mut self, matches: &clap::ArgMatches) {
        if let Some(level) = matches.get_one::<tracing::Level>("log-level") {
            self.log.level = *level;
        }
        if let Some(location) = matches.get_one::<String>("database") {
            self.database.location = location.as_str().into();
        }
        if let Some(path) = matches.get_one::<PathBuf>("state-dir") {
            self.semaphores.state_dir = path.clone();
        }
        if let Some(max) = matches.get_one::<u16>("max-scan-updates") {
            self.semaphores.limits.max_scan_updates = *max;
        }
        if let Some(max) = matches.get_one::<u16>("max-database-connections") {
            self.semaphores.limits.max_database_connections = *max;
        }
        if let Some(max) = matches.get_one::<u16>("max-report-processing") {
            self.semaphores.limits.max_report_processing = *max;
        }
        if let Some(path) = matches.get_one::<PathBuf>("agent-snapshots") {
            self.sync.snapshots = path.clone();
        }
        if let Some(interval) = matches.get_one::<u64>("agent-poll-interval") {
            self.sync.poll_interval = Duration::from_secs(*interval);
        }
    }

    fn from_matches(matches: &clap::ArgMatches) -> Result<Self, ConfigError> {
        let mut config = match matches.get_one::<PathBuf>("config") {
            Some(path) => Self::from_file(path)?,
            None => Self::default_locations()
                .into_iter()
                .find(|path| path.is_file())
                .map(|path| Self::from_file(&path))
                .transpose()?
                .unwrap_or_default(),
        };
        config.apply(matches);
        Ok(config)
    }

    /// Loads the configuration from the file given on the command line or the default locations
    /// and applies command line overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_matches(&Self::command().get_matches())
    }
}
