//! Geolocation provider protocol
//!
//! The provider does not hand out API keys. A lookup needs a session token
//! derived in three steps:
//! 1. fetch the landing page and find the versioned script it loads
//! 2. fetch that script and extract the embedded session key
//! 3. encrypt the current unix-millis timestamp with AES-256-GCM under
//!    `sha256(session key)` and send `base64(nonce || ciphertext)` in the
//!    token header
//!
//! Steps 1 and 2 are stable for long periods and are cached by the caller.
//!
//! Lookup: `GET {base}/api/ip/{ip}` returning
//! ```json
//! {"success": true, "data": {"country": "...", "countryCode": "US", "lat": 37.4, "lon": -122.1}}
//! ```

use crate::error::{PodError, Result};
use crate::http;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};

pub const SERVICE: &str = "geolocation provider";

/// Raw provider envelope
#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ProviderData>,
}

/// Geolocation fields as the provider names them
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderData {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, alias = "countryCode")]
    pub country_code: Option<String>,
    #[serde(default, alias = "regionName")]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default, alias = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "lon")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default, alias = "as")]
    pub asn: Option<String>,
}

impl ProviderData {
    /// Reject payloads that carry no usable location
    pub fn validate(&self) -> Result<()> {
        if self.country.is_none() && self.country_code.is_none() {
            return Err(PodError::external(SERVICE, "payload has no country"));
        }
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(PodError::external(SERVICE, format!("latitude out of range: {}", lat)));
            }
        }
        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(PodError::external(SERVICE, format!("longitude out of range: {}", lon)));
            }
        }
        Ok(())
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn get_text(client: &reqwest::Client, url: &str, what: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PodError::external(SERVICE, format!("{}: {}", what, http::describe(&e))))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PodError::ExternalService {
            service: SERVICE.to_string(),
            status: Some(status.as_u16()),
            message: format!("{}: HTTP {}", what, status),
        });
    }

    response
        .text()
        .await
        .map_err(|e| PodError::external(SERVICE, format!("{}: {}", what, e)))
}

/// Step 1: find the versioned script path on the landing page
pub async fn discover_script_path(
    client: &reqwest::Client,
    base_url: &str,
    pattern: &Regex,
) -> Result<String> {
    let page = get_text(client, &join_url(base_url, "/"), "landing page").await?;

    let path = pattern
        .captures(&page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| PodError::external(SERVICE, "script path not found on landing page"))?;

    log::debug!("🌍 Discovered geolocation script: {}", path);
    Ok(path)
}

/// Step 2: pull the session key out of the script
pub async fn derive_session_key(
    client: &reqwest::Client,
    base_url: &str,
    script_path: &str,
    pattern: &Regex,
) -> Result<String> {
    let script = get_text(client, &join_url(base_url, script_path), "session script").await?;

    pattern
        .captures(&script)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| PodError::external(SERVICE, "session key not found in script"))
}

/// Step 3: encrypt `timestamp_ms` into a session token
pub fn session_token(key: &str, timestamp_ms: i64) -> Result<String> {
    let digest = Sha256::digest(key.as_bytes());
    let cipher = Aes256Gcm::new_from_slice(&digest)
        .map_err(|e| PodError::external(SERVICE, format!("invalid session key: {}", e)))?;

    let mut nonce_bytes = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), timestamp_ms.to_string().as_bytes())
        .map_err(|e| PodError::external(SERVICE, format!("token encryption failed: {}", e)))?;

    let mut blob = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Issue the lookup for `ip` and validate the payload
pub async fn request_geolocation(
    client: &reqwest::Client,
    base_url: &str,
    token_header: &str,
    ip: &str,
    token: &str,
) -> Result<ProviderData> {
    let url = join_url(base_url, &format!("/api/ip/{}", ip));
    let response = client
        .get(&url)
        .header(token_header, token)
        .send()
        .await
        .map_err(|e| PodError::external(SERVICE, http::describe(&e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PodError::ExternalService {
            service: SERVICE.to_string(),
            status: Some(status.as_u16()),
            message: format!("lookup for {}: HTTP {}", ip, status),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| PodError::external(SERVICE, format!("failed to read response: {}", e)))?;

    let parsed: ProviderResponse = serde_json::from_str(&body)
        .map_err(|e| PodError::external(SERVICE, format!("malformed payload: {}", e)))?;

    if !parsed.success {
        return Err(PodError::external(SERVICE, format!("lookup for {} reported failure", ip)));
    }

    let data = parsed
        .data
        .ok_or_else(|| PodError::external(SERVICE, "payload missing data"))?;
    data.validate()?;
    Ok(data)
}
