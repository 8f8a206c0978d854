//! Metadata provider contract consumed by the resolver

use super::graph::{AssetId, DependencyDecl};
use crate::integrity::{ArtifactSignature, Digest};
use crate::version::VersionSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by a metadata provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// The asset (or the requested version of it) is not published
    #[error("Asset {asset_id} not found")]
    NotFound { asset_id: AssetId },

    /// The provider could not answer right now
    #[error("Metadata provider unavailable: {message}")]
    Unavailable { message: String },
}

/// Recorded facts about one published artifact version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ArtifactSignature>,
}

/// Source of available versions and declared dependencies
///
/// Implementations must be idempotent: the resolver's determinism relies on
/// identical answers for identical questions within a session.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// All published versions of an asset, in any order
    async fn list_versions(&self, asset_id: &AssetId) -> Result<Vec<VersionSpec>, MetadataError>;

    /// Dependencies declared by one version, in declaration order
    async fn get_dependencies(
        &self,
        asset_id: &AssetId,
        version: &VersionSpec,
    ) -> Result<Vec<DependencyDecl>, MetadataError>;

    /// Recorded digest, size and signature of one version
    async fn get_artifact(
        &self,
        asset_id: &AssetId,
        version: &VersionSpec,
    ) -> Result<ArtifactMetadata, MetadataError>;
}
