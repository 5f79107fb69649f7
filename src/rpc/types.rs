//! Typed results for the pod RPC methods
//!
//! Field names follow the wire format exactly (snake_case), so these structs
//! are deserialized straight out of the `result` member of an RPC envelope.

use serde::{Deserialize, Deserializer, Serialize};

/// Placeholder identity for roster entries that report no public key
pub const UNAVAILABLE_PUBKEY: &str = "Unavailable";

/// One entry of the node roster (`get-pods-with-stats`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    #[serde(default = "unavailable_pubkey", deserialize_with = "pubkey_or_unavailable")]
    pub pubkey: String,
    pub address: String,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub is_registered: Option<bool>,
    /// Unix seconds
    pub last_seen_timestamp: i64,
    #[serde(default)]
    pub rpc_port: Option<u16>,
    #[serde(default)]
    pub storage_committed: u64,
    #[serde(default)]
    pub storage_used: u64,
    #[serde(default)]
    pub storage_usage_percent: f64,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub version: String,
}

fn unavailable_pubkey() -> String {
    UNAVAILABLE_PUBKEY.to_string()
}

fn pubkey_or_unavailable<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(unavailable_pubkey))
}

/// Result of `get-pods-with-stats` and `get-pods`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodList {
    pub pods: Vec<PodInfo>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

/// Live resource metrics of a single pod (`get-stats`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodStats {
    pub cpu_percent: f64,
    pub ram_used: u64,
    pub ram_total: u64,
    pub uptime: u64,
    #[serde(default)]
    pub active_streams: u64,
    #[serde(default)]
    pub packets_received: u64,
    #[serde(default)]
    pub packets_sent: u64,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub total_pages: u64,
    #[serde(default)]
    pub current_index: u64,
    /// Unix seconds
    #[serde(default)]
    pub last_updated: i64,
}

/// Result of `get-version`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodVersion {
    pub version: String,
}
