use super::LeafRecord;
use crate::credits::CreditEntry;
use crate::rpc::PodInfo;
use serde::{Deserialize, Serialize};

/// Cluster-wide reduction over the roster; computed per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSummary {
    pub total_pods: usize,
    pub total_storage_committed: u64,
    pub total_storage_used: u64,
    pub average_storage_per_pod: f64,
    /// Percent of committed storage in use
    pub utilization_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_credits: Option<f64>,
}

impl RootSummary {
    /// `credits` is the network-wide credit table, when it could be fetched
    pub fn from_roster(pods: &[PodInfo], credits: Option<&[CreditEntry]>) -> Self {
        let committed = saturating_total(pods.iter().map(|p| p.storage_committed));
        let used = saturating_total(pods.iter().map(|p| p.storage_used));
        let total_credits = credits.map(|c| c.iter().map(|e| e.credits).sum());
        Self::reduce(pods.len(), committed, used, total_credits)
    }

    /// Same reduction over the leaf records of a snapshot
    pub fn from_leaves(leaves: &[LeafRecord]) -> Self {
        let committed = saturating_total(leaves.iter().map(|l| l.storage_committed));
        let used = saturating_total(leaves.iter().map(|l| l.storage_used));
        let credited: Vec<f64> = leaves.iter().filter_map(|l| l.credits).collect();
        let total_credits = if credited.is_empty() {
            None
        } else {
            Some(credited.iter().sum())
        };
        Self::reduce(leaves.len(), committed, used, total_credits)
    }

    fn reduce(total_pods: usize, committed: u64, used: u64, total_credits: Option<f64>) -> Self {
        let average_storage_per_pod = if total_pods == 0 {
            0.0
        } else {
            committed as f64 / total_pods as f64
        };
        let utilization_rate = if committed == 0 {
            0.0
        } else {
            used as f64 / committed as f64 * 100.0
        };

        Self {
            total_pods,
            total_storage_committed: committed,
            total_storage_used: used,
            average_storage_per_pod,
            utilization_rate,
            total_credits,
        }
    }
}

/// Byte totals come from self-reported pod values; clamp instead of overflowing
fn saturating_total(values: impl Iterator<Item = u64>) -> u64 {
    values.fold(0u64, u64::saturating_add)
}
