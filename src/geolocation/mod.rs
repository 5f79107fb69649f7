//! IP geolocation with a persistent store and in-memory caches
//!
//! Lookup order for a public IPv4 address:
//! 1. in-memory record cache (only if the record itself is unexpired)
//! 2. snapshot store, filtered on `expires_at > now`
//! 3. the provider, via the cached script path and session key
//!
//! Steps 2 and 3 run inside one coalesced fetch per IP, so concurrent
//! lookups for the same address share a single store read / provider call.
//! Provider results are written back with a 7-day expiry.

pub mod ipv4;
pub mod provider;

pub use ipv4::{is_public_ipv4, is_public_ipv4_str};

use crate::cache::SwrCache;
use crate::error::{PodError, Result};
use crate::store::SnapshotStore;
use async_trait::async_trait;
use provider::ProviderData;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// Normalized geolocation of one IP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeolocationRecord {
    pub ip: String,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    pub asn: Option<String>,
    /// Unix seconds
    pub queried_at: i64,
    /// Unix seconds; set on write, never extended
    pub expires_at: i64,
}

impl GeolocationRecord {
    fn from_provider(ip: &str, data: ProviderData, queried_at: i64, ttl: Duration) -> Self {
        let trimmed = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            ip: ip.to_string(),
            country: trimmed(data.country),
            country_code: trimmed(data.country_code).map(|c| c.to_uppercase()),
            region: trimmed(data.region),
            city: trimmed(data.city),
            latitude: data.latitude,
            longitude: data.longitude,
            timezone: trimmed(data.timezone),
            isp: trimmed(data.isp),
            org: trimmed(data.org),
            asn: trimmed(data.asn),
            queried_at,
            expires_at: queried_at + ttl.as_secs() as i64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeolocationConfig {
    pub base_url: String,
    /// Regex with one capture group: the versioned script path
    pub script_pattern: String,
    /// Regex with one capture group: the session key inside the script
    pub key_pattern: String,
    pub token_header: String,
    /// In-memory lifetime of the script path and session key
    pub artifact_ttl: Duration,
    /// Lifetime of a geolocation record, in memory and in the store
    pub record_ttl: Duration,
}

impl GeolocationConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            script_pattern: r#"<script[^>]+src="([^"]*/assets/index-[A-Za-z0-9_-]+\.js)""#.to_string(),
            key_pattern: r#"sessionKey\s*[:=]\s*["']([^"']{16,})["']"#.to_string(),
            token_header: "x-session-token".to_string(),
            artifact_ttl: Duration::from_secs(24 * 60 * 60),
            record_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Geolocation seam used by the aggregation pipeline
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeolocationRecord>;
}

struct GeoInner {
    http: reqwest::Client,
    config: GeolocationConfig,
    script_re: Regex,
    key_re: Regex,
    store: Option<Arc<dyn SnapshotStore>>,
    records: Arc<SwrCache<String, GeolocationRecord>>,
    script_paths: Arc<SwrCache<String, String>>,
    session_keys: Arc<SwrCache<String, String>>,
}

#[derive(Clone)]
pub struct GeolocationCache {
    inner: Arc<GeoInner>,
}

impl GeolocationCache {
    pub fn new(
        http: reqwest::Client,
        config: GeolocationConfig,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Self> {
        let script_re = Regex::new(&config.script_pattern)
            .map_err(|e| PodError::Config(format!("script pattern: {}", e)))?;
        let key_re = Regex::new(&config.key_pattern)
            .map_err(|e| PodError::Config(format!("key pattern: {}", e)))?;

        let records = Arc::new(SwrCache::new(config.record_ttl, config.record_ttl));
        let script_paths = Arc::new(SwrCache::new(config.artifact_ttl, config.artifact_ttl));
        let session_keys = Arc::new(SwrCache::new(config.artifact_ttl, config.artifact_ttl));

        Ok(Self {
            inner: Arc::new(GeoInner {
                http,
                config,
                script_re,
                key_re,
                store,
                records,
                script_paths,
                session_keys,
            }),
        })
    }

    /// Geolocate a public IPv4 address
    pub async fn lookup(&self, ip: &str) -> Result<GeolocationRecord> {
        let ip: Ipv4Addr = ip
            .trim()
            .parse()
            .map_err(|_| PodError::BadRequest(format!("not an IPv4 address: {}", ip)))?;
        if !is_public_ipv4(ip) {
            return Err(PodError::BadRequest(format!("not a public IPv4 address: {}", ip)));
        }
        let ip = ip.to_string();

        let inner = self.inner.clone();
        let key = ip.clone();
        let record = self
            .inner
            .records
            .get_fresh_or_fetch(ip.clone(), move || async move { inner.load_or_fetch(&key).await })
            .await?;

        if record.expires_at > chrono::Utc::now().timestamp() {
            return Ok(record);
        }

        // The in-memory entry outlived the record it holds
        self.inner.records.invalidate(&ip);
        let inner = self.inner.clone();
        let key = ip.clone();
        self.inner
            .records
            .fetch_coalesced(ip, move || async move { inner.load_or_fetch(&key).await })
            .await
    }

    /// Forget the cached script path and session key
    pub fn invalidate_session(&self) {
        self.inner.script_paths.invalidate_all();
        self.inner.session_keys.invalidate_all();
    }
}

#[async_trait]
impl GeoResolver for GeolocationCache {
    async fn lookup(&self, ip: &str) -> Result<GeolocationRecord> {
        GeolocationCache::lookup(self, ip).await
    }
}

impl GeoInner {
    async fn load_or_fetch(self: Arc<Self>, ip: &str) -> Result<GeolocationRecord> {
        let now = chrono::Utc::now().timestamp();

        if let Some(store) = &self.store {
            match store.find_geolocation(ip, now).await {
                Ok(Some(record)) => {
                    log::debug!("🌍 Geolocation for {} served from store", ip);
                    return Ok(record);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Geolocation store read failed for {}: {}", ip, e),
            }
        }

        let data = self.fetch_remote(ip).await?;
        let record = GeolocationRecord::from_provider(ip, data, now, self.config.record_ttl);

        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_geolocation(&record).await {
                log::warn!("Failed to persist geolocation for {}: {}", ip, e);
            }
        }

        log::info!(
            "🌍 Geolocated {} -> {}",
            ip,
            record.country_code.as_deref().unwrap_or("??")
        );
        Ok(record)
    }

    async fn fetch_remote(self: &Arc<Self>, ip: &str) -> Result<ProviderData> {
        let base_url = self.config.base_url.clone();

        let inner = self.clone();
        let script_path = self
            .script_paths
            .get_fresh_or_fetch(base_url.clone(), move || async move {
                provider::discover_script_path(&inner.http, &inner.config.base_url, &inner.script_re)
                    .await
            })
            .await?;

        let inner = self.clone();
        let path = script_path.clone();
        let session_key = self
            .session_keys
            .get_fresh_or_fetch(script_path, move || async move {
                provider::derive_session_key(&inner.http, &inner.config.base_url, &path, &inner.key_re)
                    .await
            })
            .await?;

        let token = provider::session_token(&session_key, chrono::Utc::now().timestamp_millis())?;

        let result = provider::request_geolocation(
            &self.http,
            &base_url,
            &self.config.token_header,
            ip,
            &token,
        )
        .await;

        if let Err(e) = &result {
            // A rejected token usually means the key rotated with a new script
            if matches!(e.status(), Some(401) | Some(403)) {
                log::info!("🔑 Geolocation session rejected, rediscovering script and key");
                self.script_paths.invalidate_all();
                self.session_keys.invalidate_all();
            }
        }

        result
    }
}
