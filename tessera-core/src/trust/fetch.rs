//! Content fetch provider contract

use crate::resolver::AssetId;
use crate::version::VersionSpec;
use async_trait::async_trait;
use thiserror::Error;

/// Failures reported by a content fetch provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Content for {asset_id}@{version} not found")]
    NotFound {
        asset_id: AssetId,
        version: VersionSpec,
    },

    #[error("Content store unavailable: {message}")]
    Unavailable { message: String },
}

/// Source of raw artifact bytes
///
/// Retries belong here, not in the orchestrator: a failed fetch is recorded
/// as-is.
#[async_trait]
pub trait ContentFetchProvider: Send + Sync {
    async fn fetch(&self, asset_id: &AssetId, version: &VersionSpec) -> Result<Vec<u8>, FetchError>;
}
