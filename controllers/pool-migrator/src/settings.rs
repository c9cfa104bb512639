//! Runtime settings read from the environment.

use crate::error::ControllerError;
use pool_migration::MigrationConfig;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8080";

/// Settings of one controller process.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Listen address of the health and metrics endpoints
    pub probe_addr: SocketAddr,
    pub migration: MigrationConfig,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        let raw_addr = lookup("PROBE_ADDR").unwrap_or_else(|| DEFAULT_PROBE_ADDR.to_string());
        let probe_addr = raw_addr.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("PROBE_ADDR '{raw_addr}' is not a socket address: {e}"))
        })?;

        let defaults = MigrationConfig::default();
        let migration = MigrationConfig {
            poll_interval: seconds(&lookup, "POOLSHIFT_POLL_INTERVAL_SECONDS", defaults.poll_interval)?,
            step_timeout: seconds(&lookup, "POOLSHIFT_STEP_TIMEOUT_SECONDS", defaults.step_timeout)?,
            settle_duration: seconds(&lookup, "POOLSHIFT_SETTLE_SECONDS", defaults.settle_duration)?,
        };
        if migration.poll_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "POOLSHIFT_POLL_INTERVAL_SECONDS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            namespace,
            probe_addr,
            migration,
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ControllerError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ControllerError::InvalidConfig(format!("{key} '{raw}' is not a number of seconds: {e}"))),
    }
}
