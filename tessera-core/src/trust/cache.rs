//! Shared TTL cache of sealed trust records
//!
//! Keyed by (asset id, version, digest) so the same content reached from
//! different graphs is verified once. Writes are last-writer-wins: records
//! for identical content are interchangeable, so there is nothing to merge.

use super::record::TrustRecord;
use crate::integrity::Digest;
use crate::resolver::{AssetId, AssetNode};
use crate::version::VersionSpec;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Default record lifetime: 15 minutes
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub asset_id: AssetId,
    pub version: VersionSpec,
    pub digest: Digest,
}

impl CacheKey {
    pub fn for_node(node: &AssetNode) -> Self {
        Self {
            asset_id: node.asset_id.clone(),
            version: node.version.clone(),
            digest: node.digest.clone(),
        }
    }

    pub fn for_record(record: &TrustRecord) -> Self {
        Self {
            asset_id: record.asset_id().clone(),
            version: record.version().clone(),
            digest: record.digest().clone(),
        }
    }
}

#[derive(Debug)]
struct CachedRecord {
    record: TrustRecord,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct TrustCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CachedRecord>>,
}

impl Default for TrustCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl TrustCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A live record for `key`, if any
    pub async fn get(&self, key: &CacheKey) -> Option<TrustRecord> {
        let entries = self.entries.read().await;
        let cached = entries.get(key)?;

        let age = cached.stored_at.elapsed();
        if age > self.ttl {
            debug!("Trust record for {}@{} expired (age: {:?})", key.asset_id, key.version, age);
            return None;
        }
        Some(cached.record.clone())
    }

    /// Store a sealed record, replacing any previous one for the same key
    ///
    /// Records whose content was never verified are refused; returns whether
    /// the record was stored. Expired entries are dropped on every insert.
    pub async fn insert(&self, record: TrustRecord) -> bool {
        if !record.integrity().is_verified() {
            debug!(
                "Not caching trust record for {}@{}: integrity not verified",
                record.asset_id(),
                record.version()
            );
            return false;
        }

        let key = CacheKey::for_record(&record);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cached| cached.stored_at.elapsed() <= self.ttl);
        let expired = before - entries.len();
        if expired > 0 {
            debug!("Evicted {} expired trust record(s)", expired);
        }
        entries.insert(
            key,
            CachedRecord {
                record,
                stored_at: Instant::now(),
            },
        );
        true
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cached| cached.stored_at.elapsed() <= self.ttl);
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
