use crate::credits::CreditStanding;
use crate::geolocation::GeolocationRecord;
use crate::rpc::{PodInfo, PodStats};
use serde::{Deserialize, Serialize};

/// A pod is online when it was seen within this many seconds
pub const ONLINE_WINDOW_SECS: i64 = 60;

/// Enriched per-pod result of one aggregation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafRecord {
    pub pubkey: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_info: Option<GeolocationRecord>,
    /// Live stats, present only when the pod was accessible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PodStats>,
    pub is_accessible: bool,
    pub is_online: bool,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub is_registered: Option<bool>,
    pub last_seen_timestamp: i64,
    pub storage_committed: u64,
    pub storage_used: u64,
    pub storage_usage_percent: f64,
    pub uptime: u64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_rank: Option<u32>,
}

/// Online means last seen no more than `ONLINE_WINDOW_SECS` ago
pub fn is_online(last_seen: i64, now: i64) -> bool {
    now.saturating_sub(last_seen) <= ONLINE_WINDOW_SECS
}

/// Everything gathered for one pod during enrichment
#[derive(Debug, Default)]
pub struct Enrichment {
    pub ip: Option<String>,
    pub ip_info: Option<GeolocationRecord>,
    pub is_accessible: bool,
    pub stats: Option<PodStats>,
    pub credit: Option<CreditStanding>,
}

impl LeafRecord {
    pub fn merge(pod: &PodInfo, enrichment: Enrichment, now: i64) -> Self {
        Self {
            pubkey: pod.pubkey.clone(),
            address: pod.address.clone(),
            ip: enrichment.ip,
            ip_info: enrichment.ip_info,
            stats: if enrichment.is_accessible {
                enrichment.stats
            } else {
                None
            },
            is_accessible: enrichment.is_accessible,
            is_online: is_online(pod.last_seen_timestamp, now),
            is_public: pod.is_public,
            is_registered: pod.is_registered,
            last_seen_timestamp: pod.last_seen_timestamp,
            storage_committed: pod.storage_committed,
            storage_used: pod.storage_used,
            storage_usage_percent: pod.storage_usage_percent,
            uptime: pod.uptime,
            version: pod.version.clone(),
            credits: enrichment.credit.map(|c| c.credits),
            credits_rank: enrichment.credit.map(|c| c.rank),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_leaf(pubkey: &str) -> Self {
        Self {
            pubkey: pubkey.to_string(),
            address: "8.8.8.8:9001".to_string(),
            ip: Some("8.8.8.8".to_string()),
            ip_info: None,
            stats: None,
            is_accessible: false,
            is_online: true,
            is_public: Some(true),
            is_registered: None,
            last_seen_timestamp: 1_700_000_000,
            storage_committed: 100,
            storage_used: 40,
            storage_usage_percent: 40.0,
            uptime: 3600,
            version: "0.8.0".to_string(),
            credits: Some(12.0),
            credits_rank: Some(3),
        }
    }
}
