//! Runtime configuration from environment variables

use crate::error::{PodError, Result};
use crate::pipeline::DEFAULT_CONCURRENCY;
use crate::rpc::{RpcTarget, DEFAULT_RPC_PORT};
use std::env;
use std::time::Duration;

/// Configuration for the podwatch runtime
///
/// Loaded from environment variables (after `.env`) with defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// RPC endpoint serving the cluster roster
    pub seed_rpc: String,

    /// Scheme and port used to reach every pod's RPC interface
    pub rpc_target: RpcTarget,

    /// SQLite database file; `None` runs without persistence
    pub db_path: Option<String>,

    /// Credits API URL; `None` disables credit annotation
    pub credits_url: Option<String>,

    /// Geolocation provider base URL; `None` disables geolocation
    pub geo_base_url: Option<String>,

    pub refresh_interval_ms: u64,

    /// Max pods enriched concurrently
    pub enrich_concurrency: usize,

    /// Build a single snapshot and exit
    pub run_once: bool,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `PODWATCH_SEED_RPC` (required)
    /// - `PODWATCH_RPC_PORT` (default: 6000)
    /// - `PODWATCH_RPC_SCHEME` (default: http)
    /// - `PODWATCH_DB_PATH` (optional)
    /// - `PODWATCH_CREDITS_URL` (optional)
    /// - `PODWATCH_GEO_BASE_URL` (optional)
    /// - `PODWATCH_REFRESH_INTERVAL_MS` (default: 60000)
    /// - `PODWATCH_ENRICH_CONCURRENCY` (default: 32)
    /// - `PODWATCH_RUN_ONCE` (default: false)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let seed_rpc = var("PODWATCH_SEED_RPC")
            .ok_or_else(|| PodError::Config("PODWATCH_SEED_RPC must be set".to_string()))?;

        let port = match var("PODWATCH_RPC_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| PodError::Config(format!("invalid PODWATCH_RPC_PORT: {}", raw)))?,
            None => DEFAULT_RPC_PORT,
        };

        Ok(Self {
            seed_rpc,
            rpc_target: RpcTarget {
                scheme: var("PODWATCH_RPC_SCHEME").unwrap_or_else(|| "http".to_string()),
                port,
            },
            db_path: var("PODWATCH_DB_PATH"),
            credits_url: var("PODWATCH_CREDITS_URL"),
            geo_base_url: var("PODWATCH_GEO_BASE_URL"),

            refresh_interval_ms: var("PODWATCH_REFRESH_INTERVAL_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(60_000),

            enrich_concurrency: var("PODWATCH_ENRICH_CONCURRENCY")
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_CONCURRENCY),

            run_once: var("PODWATCH_RUN_ONCE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        })
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::from_lookup(lookup(&[("PODWATCH_SEED_RPC", "http://seed:6000/rpc")])).unwrap();

        assert_eq!(config.seed_rpc, "http://seed:6000/rpc");
        assert_eq!(config.rpc_target, RpcTarget::default());
        assert_eq!(config.db_path, None);
        assert_eq!(config.credits_url, None);
        assert_eq!(config.geo_base_url, None);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.enrich_concurrency, 32);
        assert!(!config.run_once);
    }

    #[test]
    fn test_custom_config() {
        let config = Config::from_lookup(lookup(&[
            ("PODWATCH_SEED_RPC", "https://seed.example/rpc"),
            ("PODWATCH_RPC_PORT", "7000"),
            ("PODWATCH_RPC_SCHEME", "https"),
            ("PODWATCH_DB_PATH", "/tmp/podwatch.db"),
            ("PODWATCH_CREDITS_URL", "https://credits.example/api/pods-credits"),
            ("PODWATCH_GEO_BASE_URL", "https://geo.example"),
            ("PODWATCH_REFRESH_INTERVAL_MS", "5000"),
            ("PODWATCH_ENRICH_CONCURRENCY", "4"),
            ("PODWATCH_RUN_ONCE", "true"),
        ]))
        .unwrap();

        assert_eq!(config.rpc_target.port, 7000);
        assert_eq!(config.rpc_target.scheme, "https");
        assert_eq!(config.db_path.as_deref(), Some("/tmp/podwatch.db"));
        assert_eq!(config.geo_base_url.as_deref(), Some("https://geo.example"));
        assert_eq!(config.refresh_interval_ms, 5_000);
        assert_eq!(config.enrich_concurrency, 4);
        assert!(config.run_once);
    }

    #[test]
    fn test_missing_seed_is_config_error() {
        let err = Config::from_lookup(lookup(&[("PODWATCH_SEED_RPC", "  ")])).unwrap_err();
        assert!(matches!(err, PodError::Config(_)));
    }

    #[test]
    fn test_bad_port_rejected_bad_numbers_defaulted() {
        let err = Config::from_lookup(lookup(&[
            ("PODWATCH_SEED_RPC", "http://seed/rpc"),
            ("PODWATCH_RPC_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, PodError::Config(_)));

        let config = Config::from_lookup(lookup(&[
            ("PODWATCH_SEED_RPC", "http://seed/rpc"),
            ("PODWATCH_ENRICH_CONCURRENCY", "0"),
            ("PODWATCH_REFRESH_INTERVAL_MS", "soon"),
        ]))
        .unwrap();
        assert_eq!(config.enrich_concurrency, 32);
        assert_eq!(config.refresh_interval_ms, 60_000);
    }
}
