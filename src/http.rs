//! Shared HTTP client construction
//!
//! Every outbound call (pod RPC, geolocation provider, credits API) uses the
//! same bounded timeouts: a call that has not connected within
//! `CONNECT_TIMEOUT` or completed within `REQUEST_TIMEOUT` is a transport
//! failure.

use crate::error::{PodError, Result};
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a reqwest client with the standard podwatch timeouts
pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("podwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PodError::Config(format!("http client: {}", e)))
}

/// Describe a reqwest failure the way it shows up in logs
pub(crate) fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {}", e)
    } else if e.is_connect() {
        format!("unreachable: {}", e)
    } else {
        format!("request failed: {}", e)
    }
}
