// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Target configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default node id
const DEFAULT_NODE_ID: &str = "t1";

/// Default data directory for the object store
const DEFAULT_DATA_DIR: &str = "/var/tmp/xcopy";

/// Default bind address for the HTTP server
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default totally-idle timeout for copy xactions (seconds)
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default capacity of an xaction's work queue
const DEFAULT_WORK_QUEUE: usize = 256;

/// Default grace delay before an xaction stops receiving (milliseconds)
const DEFAULT_DELAY_UNREG_RECV_MS: u64 = 200;

/// Default connect timeout for transform backends (seconds)
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Target configuration loaded from environment variables or a JSON file
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub node_id: String,
    /// Root of the on-disk object store
    pub data_dir: PathBuf,
    pub bind_address: String,
    /// Hard cap on stored bytes; writes beyond it are out of space
    pub capacity_bytes: Option<u64>,
    /// An xaction with no pending work exits after this long
    pub xact_idle_timeout_secs: u64,
    pub xact_work_queue: usize,
    /// How long a finished xaction keeps accepting in-flight objects
    pub delay_unreg_recv_ms: u64,
    /// Per-object batch transform timeout when a message does not set one;
    /// 0 means no deadline
    pub etl_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            node_id: DEFAULT_NODE_ID.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            capacity_bytes: None,
            xact_idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            xact_work_queue: DEFAULT_WORK_QUEUE,
            delay_unreg_recv_ms: DEFAULT_DELAY_UNREG_RECV_MS,
            etl_timeout_secs: 0,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl TargetConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let capacity_bytes = match std::env::var("CAPACITY_BYTES") {
            Ok(raw) => Some(raw.trim().parse().context("Invalid CAPACITY_BYTES")?),
            Err(_) => None,
        };

        Ok(Self {
            node_id: std::env::var("NODE_ID").unwrap_or(defaults.node_id),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            capacity_bytes,
            xact_idle_timeout_secs: env_parse(
                "XACT_IDLE_TIMEOUT_SECS",
                defaults.xact_idle_timeout_secs,
            )?,
            xact_work_queue: env_parse("XACT_WORK_QUEUE", defaults.xact_work_queue)?,
            delay_unreg_recv_ms: env_parse("DELAY_UNREG_RECV_MS", defaults.delay_unreg_recv_ms)?,
            etl_timeout_secs: env_parse("ETL_TIMEOUT_SECS", defaults.etl_timeout_secs)?,
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
        })
    }

    /// Load configuration from a JSON file; absent fields take defaults.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.xact_idle_timeout_secs)
    }

    pub fn delay_unreg_recv(&self) -> Duration {
        Duration::from_millis(self.delay_unreg_recv_ms)
    }

    pub fn etl_timeout(&self) -> Duration {
        Duration::from_secs(self.etl_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TargetConfig::default();
        assert_eq!(config.node_id, "t1");
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.delay_unreg_recv(), Duration::from_millis(200));
        assert_eq!(config.etl_timeout(), Duration::ZERO);
        assert!(config.capacity_bytes.is_none());
    }

    #[tokio::test]
    async fn test_from_file_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(
            &path,
            r#"{"node_id": "t7", "capacity_bytes": 4096, "xact_work_queue": 8}"#,
        )
        .await
        .unwrap();

        let config = TargetConfig::from_file(&path).await.unwrap();
        assert_eq!(config.node_id, "t7");
        assert_eq!(config.capacity_bytes, Some(4096));
        assert_eq!(config.xact_work_queue, 8);
        assert_eq!(config.xact_idle_timeout_secs, 300);
    }

    #[tokio::test]
    async fn test_from_file_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(TargetConfig::from_file(&path).await.is_err());
        assert!(TargetConfig::from_file(&dir.path().join("missing")).await.is_err());
    }
}
