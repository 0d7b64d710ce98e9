//! Worker-wide static configuration.
//!
//! Loaded once per worker and passed by reference into the executor and
//! scheduler; nothing here is ambient global state.

pub mod scan;

use crate::error::ScanError;
use serde::Deserialize;
use std::path::Path;

/// HTTP client tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientTuning {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub pool_timeout_secs: u64,
    /// Keep-alive pool sizing relative to the configured concurrency.
    pub keepalive_ratio: f64,
}

impl Default for ClientTuning {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            read_timeout_secs: 10,
            write_timeout_secs: 10,
            pool_timeout_secs: 10,
            keepalive_ratio: 0.2,
        }
    }
}

impl ClientTuning {
    /// Keep-alive connection count: none for a serial scan, one for small
    /// pools, ratio-scaled beyond that.
    pub fn keepalive_connections(&self, concurrency: usize) -> usize {
        if concurrency == 1 {
            0
        } else if concurrency <= 10 {
            1
        } else {
            (concurrency as f64 * self.keepalive_ratio) as usize
        }
    }
}

/// Retry policy constants shared by every executor in a run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryTactics {
    /// A response with one of these statuses is treated as a failed attempt.
    pub retryable_status_codes: Vec<u16>,
    pub base_delay_seconds: f64,
    /// When set, exhausting retries on a retryable status writes an error
    /// record. Off by default to match upstream observable behavior.
    pub log_retry_exhaustion: bool,
}

impl Default for RetryTactics {
    fn default() -> Self {
        Self {
            retryable_status_codes: vec![429, 502, 503, 504],
            base_delay_seconds: 1.0,
            log_retry_exhaustion: false,
        }
    }
}

/// Proxy pool definition consumed when a scan enables proxying.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyConfig {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub enable_rotation: bool,
    /// URLs fetched through each proxy to confirm liveness.
    #[serde(default)]
    pub verification_addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GlobalConfig {
    pub client: ClientTuning,
    pub retry: RetryTactics,
    pub proxy: ProxyConfig,
}

impl GlobalConfig {
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("cannot read global config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ScanError::Config(format!("invalid global config {}: {e}", path.display()))
        })
    }

    /// Missing file falls back to defaults; a present but malformed file is
    /// still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ScanError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
