//! SQLite implementation of `SnapshotStore`
//!
//! Tables (see `/sql/`):
//! - `pod_accessibility` - UPSERT on (endpoint, node_id)
//! - `ip_geolocation` - UPSERT on ip, JSON payload
//! - `pod_leaves` - delete-all + insert-many per aggregation run
//!
//! Usage:
//! ```ignore
//! let store = SqliteSnapshotStore::open("/var/lib/podwatch/podwatch.db")?;
//! let geo = store.find_geolocation("8.8.8.8", now).await?;
//! ```

use super::SnapshotStore;
use crate::accessibility::AccessibilityRecord;
use crate::error::Result;
use crate::geolocation::GeolocationRecord;
use crate::pipeline::LeafRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::sync::Arc;

/// Embedded schema, applied in order. Every file uses IF NOT EXISTS.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "01_pod_accessibility.sql",
        include_str!("../../sql/01_pod_accessibility.sql"),
    ),
    (
        "02_ip_geolocation.sql",
        include_str!("../../sql/02_ip_geolocation.sql"),
    ),
    ("03_pod_leaves.sql", include_str!("../../sql/03_pod_leaves.sql")),
];

/// Run the embedded schema migrations (idempotent)
pub fn run_schema_migrations(conn: &mut Connection) -> Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("📊 SQLite journal mode: {}", mode);

    for (name, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }

    log::info!("✅ Schema migrations completed ({} files)", MIGRATIONS.len());
    Ok(())
}

/// Thread-safe SQLite store shared by the caches and the pipeline
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database at `db_path` and apply the schema
    pub fn open(db_path: &str) -> Result<Self> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        run_schema_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn upsert_accessibility(&self, record: &AccessibilityRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO pod_accessibility
                (endpoint, node_id, reachable, latency_ms, error, checked_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(endpoint, node_id) DO UPDATE SET
                reachable = excluded.reachable,
                latency_ms = excluded.latency_ms,
                error = excluded.error,
                checked_at = excluded.checked_at,
                expires_at = excluded.expires_at
            "#,
            rusqlite::params![
                record.endpoint,
                record.node_id.as_deref().unwrap_or(""),
                record.reachable,
                record.latency_ms as i64,
                record.error,
                record.checked_at,
                record.expires_at,
            ],
        )?;
        Ok(())
    }

    async fn find_accessibility(
        &self,
        endpoint: &str,
        node_id: Option<&str>,
        now: i64,
    ) -> Result<Option<AccessibilityRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT endpoint, node_id, reachable, latency_ms, error, checked_at, expires_at
             FROM pod_accessibility
             WHERE endpoint = ?1 AND node_id = ?2 AND expires_at > ?3",
        )?;

        let record = stmt
            .query_row(
                rusqlite::params![endpoint, node_id.unwrap_or(""), now],
                |row| {
                    let node_id: String = row.get(1)?;
                    let latency_ms: i64 = row.get(3)?;
                    Ok(AccessibilityRecord {
                        endpoint: row.get(0)?,
                        node_id: if node_id.is_empty() { None } else { Some(node_id) },
                        reachable: row.get(2)?,
                        latency_ms: latency_ms.max(0) as u64,
                        error: row.get(4)?,
                        checked_at: row.get(5)?,
                        expires_at: row.get(6)?,
                    })
                },
            )
            .optional()?;

        Ok(record)
    }

    async fn upsert_geolocation(&self, record: &GeolocationRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO ip_geolocation (ip, payload, queried_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(ip) DO UPDATE SET
                payload = excluded.payload,
                queried_at = excluded.queried_at,
                expires_at = excluded.expires_at
            "#,
            rusqlite::params![record.ip, payload, record.queried_at, record.expires_at],
        )?;
        Ok(())
    }

    async fn find_geolocation(&self, ip: &str, now: i64) -> Result<Option<GeolocationRecord>> {
        let payload: Option<String> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT payload FROM ip_geolocation WHERE ip = ?1 AND expires_at > ?2",
            )?;
            stmt.query_row(rusqlite::params![ip, now], |row| row.get(0))
                .optional()?
        };

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_all_leaves(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM pod_leaves", [])?;
        Ok(deleted)
    }

    async fn insert_leaves(&self, records: &[LeafRecord]) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let payloads = records
            .iter()
            .map(|r| Ok((r.pubkey.clone(), serde_json::to_string(r)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO pod_leaves (position, pubkey, payload, snapshot_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, (pubkey, payload)) in payloads.iter().enumerate() {
                stmt.execute(rusqlite::params![position as i64, pubkey, payload, now])?;
            }
        }
        tx.commit()?;

        Ok(payloads.len())
    }

    async fn load_leaf_records(&self) -> Result<Vec<LeafRecord>> {
        let payloads: Vec<String> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached("SELECT payload FROM pod_leaves ORDER BY position")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };

        payloads
            .iter()
            .map(|json| Ok(serde_json::from_str(json)?))
            .collect()
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let accessibility = conn.execute(
            "DELETE FROM pod_accessibility WHERE expires_at <= ?1",
            [now],
        )?;
        let geolocation =
            conn.execute("DELETE FROM ip_geolocation WHERE expires_at <= ?1", [now])?;
        Ok(accessibility + geolocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn geo(ip: &str, expires_at: i64) -> GeolocationRecord {
        GeolocationRecord {
            ip: ip.to_string(),
            country: Some("United States".to_string()),
            country_code: Some("US".to_string()),
            region: None,
            city: Some("Mountain View".to_string()),
            latitude: Some(37.4),
            longitude: Some(-122.1),
            timezone: None,
            isp: Some("Google LLC".to_string()),
            org: None,
            asn: Some("AS15169".to_string()),
            queried_at: expires_at - 100,
            expires_at,
        }
    }

    fn access(endpoint: &str, node_id: Option<&str>, reachable: bool, expires_at: i64) -> AccessibilityRecord {
        AccessibilityRecord {
            endpoint: endpoint.to_string(),
            node_id: node_id.map(str::to_string),
            reachable,
            latency_ms: 12,
            error: if reachable { None } else { Some("timeout".to_string()) },
            checked_at: expires_at - 3600,
            expires_at,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap();
        let mut conn = Connection::open(path).unwrap();
        run_schema_migrations(&mut conn).unwrap();
        run_schema_migrations(&mut conn).unwrap();

        // Reopening an existing database works as well
        drop(conn);
        assert!(SqliteSnapshotStore::open(path).is_ok());
    }

    #[tokio::test]
    async fn test_geolocation_expiry_filter() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        store.upsert_geolocation(&geo("8.8.8.8", 2_000)).await.unwrap();

        let found = store.find_geolocation("8.8.8.8", 1_999).await.unwrap();
        assert_eq!(found, Some(geo("8.8.8.8", 2_000)));

        // expires_at == now is already expired
        assert!(store.find_geolocation("8.8.8.8", 2_000).await.unwrap().is_none());
        assert!(store.find_geolocation("1.1.1.1", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_geolocation_upsert_replaces() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        store.upsert_geolocation(&geo("8.8.8.8", 2_000)).await.unwrap();

        let mut newer = geo("8.8.8.8", 5_000);
        newer.city = Some("Chicago".to_string());
        store.upsert_geolocation(&newer).await.unwrap();

        let found = store.find_geolocation("8.8.8.8", 3_000).await.unwrap().unwrap();
        assert_eq!(found.city.as_deref(), Some("Chicago"));
    }

    #[tokio::test]
    async fn test_accessibility_upsert_supersedes() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        let endpoint = "http://8.8.8.8:6000/rpc";

        store.upsert_accessibility(&access(endpoint, Some("pod"), true, 10_000)).await.unwrap();
        store.upsert_accessibility(&access(endpoint, Some("pod"), false, 20_000)).await.unwrap();

        let found = store.find_accessibility(endpoint, Some("pod"), 15_000).await.unwrap().unwrap();
        assert!(!found.reachable);
        assert_eq!(found.error.as_deref(), Some("timeout"));

        // Missing node id round-trips as None
        store.upsert_accessibility(&access(endpoint, None, true, 20_000)).await.unwrap();
        let anon = store.find_accessibility(endpoint, None, 0).await.unwrap().unwrap();
        assert_eq!(anon.node_id, None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        store.upsert_geolocation(&geo("8.8.8.8", 100)).await.unwrap();
        store.upsert_geolocation(&geo("1.1.1.1", 900)).await.unwrap();
        store.upsert_accessibility(&access("e", Some("a"), true, 100)).await.unwrap();

        let purged = store.purge_expired(500).await.unwrap();
        assert_eq!(purged, 2);
        assert!(store.find_geolocation("1.1.1.1", 500).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_leaf_records_keeps_order() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        let first: Vec<LeafRecord> = (0..3).map(|i| LeafRecord::test_leaf(&format!("old{}", i))).collect();
        let second: Vec<LeafRecord> = ["c", "a", "b"].iter().map(|k| LeafRecord::test_leaf(k)).collect();

        store.replace_leaf_records(&first).await.unwrap();
        let inserted = store.replace_leaf_records(&second).await.unwrap();
        assert_eq!(inserted, 3);

        let loaded = store.load_leaf_records().await.unwrap();
        let keys: Vec<&str> = loaded.iter().map(|l| l.pubkey.as_str()).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_replace_with_empty_set() {
        let store = SqliteSnapshotStore::open_in_memory().unwrap();
        store.replace_leaf_records(&[LeafRecord::test_leaf("x")]).await.unwrap();
        store.replace_leaf_records(&[]).await.unwrap();
        assert!(store.load_leaf_records().await.unwrap().is_empty());
    }
}
