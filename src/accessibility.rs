//! Pod reachability checks behind a stale-while-revalidate cache
//!
//! A pod counts as accessible when its RPC interface answers `get-stats`.
//! Results are cached in memory per (probe endpoint, node id):
//! - younger than `fresh_for` (5 min): returned without touching the network
//! - between `fresh_for` and `gc_after` (1 h): returned immediately while a
//!   background probe refreshes the entry
//! - older than `gc_after`: evicted, the next check probes again
//!
//! An unreachable pod is a valid, cacheable answer and is never surfaced as
//! an error. Every fresh probe result is also upserted into the snapshot
//! store in the background; store failures are logged and otherwise ignored.

use crate::cache::{ExponentialBackoff, SwrCache};
use crate::error::Result;
use crate::rpc::{RpcClient, RpcTarget};
use crate::store::SnapshotStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Latest reachability result for one pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityRecord {
    pub endpoint: String,
    pub node_id: Option<String>,
    pub reachable: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    /// Unix seconds
    pub checked_at: i64,
    /// Unix seconds; set on write, never extended
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct AccessibilityConfig {
    pub target: RpcTarget,
    pub fresh_for: Duration,
    pub gc_after: Duration,
    /// Lifetime of the persisted record
    pub record_ttl: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for AccessibilityConfig {
    fn default() -> Self {
        Self {
            target: RpcTarget::default(),
            fresh_for: Duration::from_secs(5 * 60),
            gc_after: Duration::from_secs(60 * 60),
            record_ttl: Duration::from_secs(60 * 60),
            max_retries: 2,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccessKey {
    endpoint: String,
    node_id: Option<String>,
}

/// Reachability check seam used by the aggregation pipeline
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    async fn check_accessible(&self, endpoint: &str, node_id: Option<&str>) -> bool;
}

pub struct AccessibilityCache {
    rpc: RpcClient,
    store: Option<Arc<dyn SnapshotStore>>,
    config: AccessibilityConfig,
    cache: Arc<SwrCache<AccessKey, AccessibilityRecord>>,
}

impl AccessibilityCache {
    pub fn new(
        rpc: RpcClient,
        store: Option<Arc<dyn SnapshotStore>>,
        config: AccessibilityConfig,
    ) -> Self {
        let cache = Arc::new(SwrCache::new(config.fresh_for, config.gc_after));
        Self {
            rpc,
            store,
            config,
            cache,
        }
    }

    /// Canonical probe URL: host of `endpoint` plus the fixed RPC port
    pub fn probe_endpoint(&self, endpoint: &str) -> String {
        self.config.target.endpoint_for(endpoint)
    }

    /// Full record for `endpoint`, served from cache when possible
    pub async fn check(&self, endpoint: &str, node_id: Option<&str>) -> AccessibilityRecord {
        let probe_url = self.probe_endpoint(endpoint);
        let key = AccessKey {
            endpoint: probe_url.clone(),
            node_id: node_id.map(str::to_string),
        };

        let rpc = self.rpc.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let node = key.node_id.clone();
        let url = probe_url.clone();

        let result = self
            .cache
            .get_or_fetch(key, move || async move {
                let record = probe(&rpc, &url, node, &config).await;
                persist_in_background(store, record.clone());
                Ok(record)
            })
            .await;

        result.unwrap_or_else(|e| {
            failure_record(probe_url, node_id.map(str::to_string), 0, e.to_string(), &self.config)
        })
    }

    /// Drop cached results for one endpoint (any node id)
    pub fn invalidate(&self, endpoint: &str) -> usize {
        let probe_url = self.probe_endpoint(endpoint);
        self.cache.invalidate_where(|k| k.endpoint == probe_url)
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl ReachabilityCheck for AccessibilityCache {
    async fn check_accessible(&self, endpoint: &str, node_id: Option<&str>) -> bool {
        self.check(endpoint, node_id).await.reachable
    }
}

/// Probe `get-stats` with bounded exponential backoff
async fn probe(
    rpc: &RpcClient,
    url: &str,
    node_id: Option<String>,
    config: &AccessibilityConfig,
) -> AccessibilityRecord {
    let mut backoff = ExponentialBackoff::new(
        config.backoff_base,
        config.backoff_cap,
        config.max_retries,
    );

    loop {
        let started = Instant::now();
        let outcome = rpc.get_stats(url).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(_) => {
                log::debug!("✅ {} reachable ({}ms)", url, latency_ms);
                let now = chrono::Utc::now().timestamp();
                return AccessibilityRecord {
                    endpoint: url.to_string(),
                    node_id,
                    reachable: true,
                    latency_ms,
                    error: None,
                    checked_at: now,
                    expires_at: now + config.record_ttl.as_secs() as i64,
                };
            }
            Err(e) => {
                log::debug!("⚠️  Probe of {} failed: {}", url, e);
                if backoff.sleep().await.is_err() {
                    log::info!(
                        "❌ {} unreachable after {} retries: {}",
                        url,
                        config.max_retries,
                        e
                    );
                    return failure_record(url.to_string(), node_id, latency_ms, e.to_string(), config);
                }
            }
        }
    }
}

fn failure_record(
    endpoint: String,
    node_id: Option<String>,
    latency_ms: u64,
    error: String,
    config: &AccessibilityConfig,
) -> AccessibilityRecord {
    let now = chrono::Utc::now().timestamp();
    AccessibilityRecord {
        endpoint,
        node_id,
        reachable: false,
        latency_ms,
        error: Some(error),
        checked_at: now,
        expires_at: now + config.record_ttl.as_secs() as i64,
    }
}

fn persist_in_background(store: Option<Arc<dyn SnapshotStore>>, record: AccessibilityRecord) {
    let Some(store) = store else {
        return;
    };

    tokio::spawn(async move {
        let result: Result<()> = store.upsert_accessibility(&record).await;
        if let Err(e) = result {
            log::warn!("Failed to persist accessibility for {}: {}", record.endpoint, e);
        }
    });
}
