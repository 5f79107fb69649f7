//! Snapshot store boundary
//!
//! The store is an advisory cache and snapshot sink. podwatch only needs:
//! - upsert by natural key (accessibility, geolocation)
//! - find by key, filtered on `expires_at > now`
//! - delete-all + insert-many for the leaf snapshot
//!
//! Any key-value or document store offering those operations can implement
//! `SnapshotStore`. The crate ships a SQLite implementation in `sqlite`.

pub mod sqlite;

pub use sqlite::SqliteSnapshotStore;

use crate::accessibility::AccessibilityRecord;
use crate::error::Result;
use crate::geolocation::GeolocationRecord;
use crate::pipeline::LeafRecord;
use async_trait::async_trait;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or supersede the record for (endpoint, node id)
    async fn upsert_accessibility(&self, record: &AccessibilityRecord) -> Result<()>;

    /// Unexpired record for (endpoint, node id), if any
    async fn find_accessibility(
        &self,
        endpoint: &str,
        node_id: Option<&str>,
        now: i64,
    ) -> Result<Option<AccessibilityRecord>>;

    /// Insert or replace the record for `record.ip`
    async fn upsert_geolocation(&self, record: &GeolocationRecord) -> Result<()>;

    /// Unexpired record for `ip`, if any
    async fn find_geolocation(&self, ip: &str, now: i64) -> Result<Option<GeolocationRecord>>;

    async fn delete_all_leaves(&self) -> Result<usize>;

    async fn insert_leaves(&self, records: &[LeafRecord]) -> Result<usize>;

    /// Leaf records of the last snapshot, in insertion order
    async fn load_leaf_records(&self) -> Result<Vec<LeafRecord>>;

    /// Delete accessibility and geolocation records with `expires_at <= now`
    async fn purge_expired(&self, now: i64) -> Result<usize>;

    /// Replace the leaf snapshot: delete everything, then insert `records`
    ///
    /// Not atomic with respect to readers: a read between the two steps sees
    /// an empty snapshot.
    async fn replace_leaf_records(&self, records: &[LeafRecord]) -> Result<usize> {
        let deleted = self.delete_all_leaves().await?;
        let inserted = self.insert_leaves(records).await?;
        log::debug!("🗂️  Leaf snapshot replaced ({} -> {})", deleted, inserted);
        Ok(inserted)
    }
}
