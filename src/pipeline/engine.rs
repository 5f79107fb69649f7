//! Aggregation engine
//!
//! One run:
//!
//! ```text
//! get-pods-with-stats (seed) ─┐
//!                             ├─► per pod (bounded, roster order):
//! credits API ────────────────┘     geolocation ║ accessibility → get-stats
//!                                          ↓
//!                                   merge into LeafRecord
//!                                          ↓
//!                                   replace leaf snapshot
//! ```
//!
//! The roster fetch is the only fatal step. Everything else degrades to an
//! omitted block on the affected leaf.

use super::leaf::{Enrichment, LeafRecord};
use super::summary::RootSummary;
use crate::accessibility::ReachabilityCheck;
use crate::credits::{rank_credits, CreditEntry, CreditStanding, CreditsClient};
use crate::error::Result;
use crate::geolocation::{GeoResolver, GeolocationRecord};
use crate::rpc::{host_of, PodInfo, PodStats, RpcClient, RpcTarget, UNAVAILABLE_PUBKEY};
use crate::store::SnapshotStore;
use futures::stream::{self, StreamExt};
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const DEFAULT_CONCURRENCY: usize = 32;

pub struct AggregationPipeline {
    rpc: RpcClient,

    /// RPC endpoint that serves the cluster roster
    seed_endpoint: String,

    /// Maps advertised pod addresses to their RPC endpoints
    target: RpcTarget,

    accessibility: Arc<dyn ReachabilityCheck>,
    geolocation: Option<Arc<dyn GeoResolver>>,
    credits: Option<CreditsClient>,
    store: Option<Arc<dyn SnapshotStore>>,

    /// Max pods enriched at once
    concurrency: usize,

    /// Timestamp function (for testing with mock time)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl AggregationPipeline {
    pub fn new(
        rpc: RpcClient,
        seed_endpoint: impl Into<String>,
        accessibility: Arc<dyn ReachabilityCheck>,
    ) -> Self {
        Self {
            rpc,
            seed_endpoint: seed_endpoint.into(),
            target: RpcTarget::default(),
            accessibility,
            geolocation: None,
            credits: None,
            store: None,
            concurrency: DEFAULT_CONCURRENCY,
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
        }
    }

    pub fn with_target(mut self, target: RpcTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_geolocation(mut self, geolocation: Arc<dyn GeoResolver>) -> Self {
        self.geolocation = Some(geolocation);
        self
    }

    pub fn with_credits(mut self, credits: CreditsClient) -> Self {
        self.credits = Some(credits);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Zero is treated as one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timestamp_fn(mut self, now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Build one enriched leaf record per roster entry, in roster order
    ///
    /// # Returns
    /// * `Ok(leaves)` - exactly one leaf per pod; the snapshot store (if any)
    ///   has been asked to replace its leaf set
    /// * `Err(_)` - the roster could not be fetched
    pub async fn build_leaf_records(&self) -> Result<Vec<LeafRecord>> {
        let now = (self.now_fn)();

        let (roster, credits) = tokio::join!(
            self.rpc.get_pods_with_stats(&self.seed_endpoint),
            self.fetch_credits()
        );
        let roster = roster?;
        log::info!("📡 Roster has {} pods", roster.pods.len());

        let standings = credits.as_deref().map(rank_credits).unwrap_or_default();

        let leaves: Vec<LeafRecord> = stream::iter(roster.pods.iter())
            .map(|pod| self.enrich(pod, standings.get(&pod.pubkey).copied(), now))
            .buffered(self.concurrency)
            .collect()
            .await;

        log::info!(
            "✅ Built {} leaf records ({} accessible, {} online, {} geolocated)",
            leaves.len(),
            leaves.iter().filter(|l| l.is_accessible).count(),
            leaves.iter().filter(|l| l.is_online).count(),
            leaves.iter().filter(|l| l.ip_info.is_some()).count(),
        );

        self.persist_snapshot(&leaves).await;
        Ok(leaves)
    }

    /// Cluster totals over the current roster
    pub async fn build_root_summary(&self) -> Result<RootSummary> {
        let (roster, credits) = tokio::join!(
            self.rpc.get_pods_with_stats(&self.seed_endpoint),
            self.fetch_credits()
        );
        let roster = roster?;
        Ok(RootSummary::from_roster(&roster.pods, credits.as_deref()))
    }

    async fn fetch_credits(&self) -> Option<Vec<CreditEntry>> {
        let client = self.credits.as_ref()?;
        match client.fetch_credits().await {
            Ok(entries) => Some(entries),
            Err(e) => {
                log::warn!("⚠️  Credits unavailable, continuing without: {}", e);
                None
            }
        }
    }

    async fn enrich(&self, pod: &PodInfo, credit: Option<CreditStanding>, now: i64) -> LeafRecord {
        let ip = extract_ipv4(&pod.address);

        let (ip_info, (is_accessible, stats)) =
            tokio::join!(self.locate(ip.clone()), self.probe_stats(pod));

        LeafRecord::merge(
            pod,
            Enrichment {
                ip,
                ip_info,
                is_accessible,
                stats,
                credit,
            },
            now,
        )
    }

    async fn locate(&self, ip: Option<String>) -> Option<GeolocationRecord> {
        let resolver = self.geolocation.as_ref()?;
        let ip = ip?;
        match resolver.lookup(&ip).await {
            Ok(record) => Some(record),
            Err(e) => {
                log::debug!("🌍 No geolocation for {}: {}", ip, e);
                None
            }
        }
    }

    async fn probe_stats(&self, pod: &PodInfo) -> (bool, Option<PodStats>) {
        let node_id = (pod.pubkey != UNAVAILABLE_PUBKEY).then_some(pod.pubkey.as_str());
        if !self.accessibility.check_accessible(&pod.address, node_id).await {
            return (false, None);
        }

        let endpoint = self.target.endpoint_for(&pod.address);
        match self.rpc.get_stats(&endpoint).await {
            Ok(stats) => (true, Some(stats)),
            Err(e) => {
                log::warn!("⚠️  Stats fetch failed for {}: {}", endpoint, e);
                (true, None)
            }
        }
    }

    async fn persist_snapshot(&self, leaves: &[LeafRecord]) {
        let Some(store) = &self.store else {
            return;
        };
        match store.replace_leaf_records(leaves).await {
            Ok(count) => log::debug!("💾 Leaf snapshot stored ({} records)", count),
            Err(e) => log::warn!("⚠️  Failed to store leaf snapshot: {}", e),
        }
    }
}

/// IPv4 host of an advertised address, if it has one
pub fn extract_ipv4(address: &str) -> Option<String> {
    host_of(address)
        .parse::<Ipv4Addr>()
        .ok()
        .map(|ip| ip.to_string())
}
