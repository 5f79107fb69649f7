//! podwatch: storage-pod cluster aggregation
//!
//! Fetches the pod roster over JSON-RPC, enriches every pod with
//! reachability, live stats, geolocation and credits, and keeps the result
//! as a point-in-time snapshot.

pub mod accessibility;
pub mod cache;
pub mod config;
pub mod credits;
pub mod error;
pub mod geolocation;
pub mod http;
pub mod pipeline;
pub mod rpc;
pub mod store;

pub use accessibility::{AccessibilityCache, AccessibilityConfig, AccessibilityRecord, ReachabilityCheck};
pub use config::Config;
pub use credits::{CreditEntry, CreditsClient};
pub use error::{PodError, Result};
pub use geolocation::{GeoResolver, GeolocationCache, GeolocationConfig, GeolocationRecord};
pub use pipeline::{AggregationPipeline, LeafRecord, RootSummary};
pub use rpc::{PodInfo, PodStats, RpcClient, RpcTarget};
pub use store::{SnapshotStore, SqliteSnapshotStore};
