use std::path::PathBuf;
use std::time::Duration;

use crate::reaper::SweeperConfig;
use crate::service::ReservePolicy;

/// Process settings, read from `ROOMHOLD_*` environment variables.
///
/// Unset or unparsable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub sweeper: SweeperConfig,
    pub policy: ReservePolicy,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());
        let secs = |key: &str, default: u64| Duration::from_secs(parsed(key).unwrap_or(default));

        Self {
            port: get("ROOMHOLD_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5433),
            bind: get("ROOMHOLD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("ROOMHOLD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("ROOMHOLD_PASSWORD").unwrap_or_else(|| "roomhold".into()),
            max_connections: get("ROOMHOLD_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(256),
            compact_threshold: parsed("ROOMHOLD_COMPACT_THRESHOLD").unwrap_or(1000),
            sweeper: SweeperConfig {
                initial_delay: secs("ROOMHOLD_SWEEP_INITIAL_DELAY_SECS", 10),
                interval: secs("ROOMHOLD_SWEEP_INTERVAL_SECS", 30),
                hold_ttl: secs("ROOMHOLD_HOLD_TTL_SECS", 300),
            },
            policy: ReservePolicy {
                reuse_canceled: get("ROOMHOLD_REUSE_CANCELED")
                    .and_then(|s| parse_bool(&s))
                    .unwrap_or(true),
            },
            metrics_port: get("ROOMHOLD_METRICS_PORT").and_then(|s| s.parse().ok()),
            tls_cert: get("ROOMHOLD_TLS_CERT"),
            tls_key: get("ROOMHOLD_TLS_KEY"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomhold.wal")
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
