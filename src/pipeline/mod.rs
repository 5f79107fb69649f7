//! # Aggregation Pipeline
//!
//! Turns the cluster roster into enriched per-pod leaf records and a
//! cluster-wide root summary.
//!
//! ## Flow
//!
//! 1. Fetch the roster from the seed RPC endpoint (fatal on failure)
//! 2. Fetch the credit table alongside it (ignored on failure)
//! 3. Enrich every pod concurrently: geolocation, accessibility, live stats
//! 4. Merge into `LeafRecord`s in roster order
//! 5. Replace the leaf snapshot in the store (best-effort)
//!
//! `is_online` is recomputed on every run from `last_seen_timestamp` and is
//! never cached.

pub mod engine;
pub mod leaf;
pub mod summary;

pub use engine::{extract_ipv4, AggregationPipeline, DEFAULT_CONCURRENCY};
pub use leaf::{is_online, Enrichment, LeafRecord, ONLINE_WINDOW_SECS};
pub use summary::RootSummary;
