//! Pod credits API integration
//!
//! Provides the network-wide credit table used to annotate leaf records
//! with a credit score and rank.
//!
//! ## API Reference
//!
//! Endpoint: configured via `PODWATCH_CREDITS_URL`
//! Returns: `{"pods_credits": [{"pod_id": "...", "credits": 1234}, ...]}`
//!
//! The table is fetched fresh for every aggregation run and never persisted.
//! Callers treat a failed fetch as "no credit data".

use crate::error::{PodError, Result};
use crate::http;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SERVICE: &str = "credits API";

/// One row of the credit table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditEntry {
    pub pod_id: String,
    pub credits: f64,
}

#[derive(Debug, Deserialize)]
struct CreditsResponse {
    pods_credits: Vec<CreditEntry>,
}

/// Credits of one pod plus its rank (1 = most credits)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditStanding {
    pub credits: f64,
    pub rank: u32,
}

#[derive(Debug, Clone)]
pub struct CreditsClient {
    http: reqwest::Client,
    url: String,
}

impl CreditsClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    /// Fetch and validate the credit table
    ///
    /// # Returns
    /// * `Ok(entries)` - every entry has a non-empty pod id and finite credits
    /// * `Err(Transport)` - the API could not be reached
    /// * `Err(ExternalService)` - non-success status or invalid payload
    pub async fn fetch_credits(&self) -> Result<Vec<CreditEntry>> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PodError::transport(&self.url, http::describe(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PodError::ExternalService {
                service: SERVICE.to_string(),
                status: Some(status.as_u16()),
                message: format!("HTTP {}", status),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| PodError::transport(&self.url, format!("failed to read response: {}", e)))?;

        let parsed: CreditsResponse = serde_json::from_str(&body)
            .map_err(|e| PodError::external(SERVICE, format!("invalid payload: {}", e)))?;

        validate_entries(&parsed.pods_credits)?;

        log::debug!("💳 Fetched {} credit entries", parsed.pods_credits.len());
        Ok(parsed.pods_credits)
    }
}

fn validate_entries(entries: &[CreditEntry]) -> Result<()> {
    for entry in entries {
        if entry.pod_id.trim().is_empty() {
            return Err(PodError::external(SERVICE, "entry with empty pod_id"));
        }
        if !entry.credits.is_finite() {
            return Err(PodError::external(
                SERVICE,
                format!("non-finite credits for {}", entry.pod_id),
            ));
        }
    }
    Ok(())
}

/// Rank pods by credits, highest first
///
/// Ties share a rank and the next rank skips accordingly (1, 2, 2, 4).
/// Duplicate pod ids keep their first occurrence.
pub fn rank_credits(entries: &[CreditEntry]) -> HashMap<String, CreditStanding> {
    let mut seen = std::collections::HashSet::new();
    let mut sorted: Vec<&CreditEntry> = entries
        .iter()
        .filter(|e| seen.insert(e.pod_id.as_str()))
        .collect();
    sorted.sort_by(|a, b| b.credits.total_cmp(&a.credits));

    let mut standings = HashMap::with_capacity(sorted.len());
    let mut rank = 0u32;
    let mut previous: Option<f64> = None;

    for (index, entry) in sorted.iter().enumerate() {
        if previous != Some(entry.credits) {
            rank = index as u32 + 1;
            previous = Some(entry.credits);
        }
        standings.insert(
            entry.pod_id.clone(),
            CreditStanding {
                credits: entry.credits,
                rank,
            },
        );
    }

    standings
}
