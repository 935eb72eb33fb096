// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::{collections::BTreeMap, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::Level;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

mod level {
    use super::*;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(level.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Level::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetLevel(#[serde(with = "level")] pub Level);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    #[serde(with = "level")]
    pub level: Level,
    /// Per target overrides, e.g. `sqlx = "WARN"`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub additional: BTreeMap<String, TargetLevel>,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            additional: BTreeMap::from([("sqlx".to_owned(), TargetLevel(Level::WARN))]),
        }
    }
}

impl Logging {
    /// Directives understood by [`EnvFilter`].
    pub fn directives(&self) -> String {
        std::iter::once(self.level.as_str().to_lowercase())
            .chain(
                self.additional
                    .iter()
                    .map(|(target, level)| format!("{target}={}", level.0.as_str().to_lowercase())),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn init(&self) {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(self.directives());
        if let Err(error) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
            eprintln!("logging already initialized: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives() {
        assert_eq!(Logging::default().directives(), "info,sqlx=warn");
    }

    #[test]
    fn parses_toml() {
        let logging: Logging = toml::from_str(
            r#"
            level = "DEBUG"
            [additional]
            managerlib = "TRACE"
            "#,
        )
        .unwrap();
        assert_eq!(logging.level, Level::DEBUG);
        assert_eq!(logging.directives(), "debug,managerlib=trace");
    }
}
