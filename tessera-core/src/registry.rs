//! In-memory asset registry
//!
//! Serves both resolver metadata and artifact bytes from memory. Useful for
//! embedding hosts that already hold their catalog, and for driving the
//! engine deterministically in tests.

use crate::integrity::{canonical_payload, digest, ArtifactSignature, PublicKeyRecord};
use crate::resolver::{ArtifactMetadata, AssetId, DependencyDecl, MetadataError, MetadataProvider};
use crate::trust::{ContentFetchProvider, FetchError};
use crate::version::VersionSpec;
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Published {
    artifact: ArtifactMetadata,
    dependencies: Vec<DependencyDecl>,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    assets: Mutex<BTreeMap<AssetId, BTreeMap<VersionSpec, Published>>>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn assets(&self) -> MutexGuard<'_, BTreeMap<AssetId, BTreeMap<VersionSpec, Published>>> {
        // A panic while holding the lock cannot leave the maps half-updated
        self.assets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish an unsigned version; returns the recorded metadata
    pub fn publish(
        &self,
        asset_id: impl Into<AssetId>,
        version: VersionSpec,
        content: impl Into<Vec<u8>>,
        dependencies: Vec<DependencyDecl>,
    ) -> ArtifactMetadata {
        let content = content.into();
        let artifact = ArtifactMetadata {
            digest: digest(&content),
            size: content.len() as u64,
            signature: None,
        };
        self.insert(asset_id.into(), version, content, dependencies, artifact)
    }

    /// Publish a version signed over its canonical payload with `key`
    pub fn publish_signed(
        &self,
        asset_id: impl Into<AssetId>,
        version: VersionSpec,
        content: impl Into<Vec<u8>>,
        dependencies: Vec<DependencyDecl>,
        key: &SigningKey,
    ) -> ArtifactMetadata {
        let asset_id = asset_id.into();
        let content = content.into();
        let content_digest = digest(&content);
        let size = content.len() as u64;

        let payload = canonical_payload(asset_id.as_str(), &version, &content_digest, size);
        let signature = ArtifactSignature {
            key_fingerprint: PublicKeyRecord::fingerprint_of(key.verifying_key().as_bytes()),
            signature: key.sign(&payload).to_bytes().to_vec(),
        };

        let artifact = ArtifactMetadata {
            digest: content_digest,
            size,
            signature: Some(signature),
        };
        self.insert(asset_id, version, content, dependencies, artifact)
    }

    fn insert(
        &self,
        asset_id: AssetId,
        version: VersionSpec,
        content: Vec<u8>,
        dependencies: Vec<DependencyDecl>,
        artifact: ArtifactMetadata,
    ) -> ArtifactMetadata {
        tracing::debug!("Publishing {}@{} ({} bytes)", asset_id, version, content.len());
        self.assets().entry(asset_id).or_default().insert(
            version,
            Published {
                artifact: artifact.clone(),
                dependencies,
                content,
            },
        );
        artifact
    }

    /// Replace the served bytes of a version while keeping its recorded digest
    ///
    /// Returns false when the version was never published.
    pub fn tamper(
        &self,
        asset_id: &AssetId,
        version: &VersionSpec,
        content: impl Into<Vec<u8>>,
    ) -> bool {
        match self
            .assets()
            .get_mut(asset_id)
            .and_then(|versions| versions.get_mut(version))
        {
            Some(published) => {
                published.content = content.into();
                true
            }
            None => false,
        }
    }

    /// Make every lookup and fetch fail with an availability error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of content fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err("registry is offline".to_string());
        }
        Ok(())
    }

    fn published(&self, asset_id: &AssetId, version: &VersionSpec) -> Option<Published> {
        self.assets()
            .get(asset_id)
            .and_then(|versions| versions.get(version))
            .cloned()
    }
}

#[async_trait]
impl MetadataProvider for InMemoryRegistry {
    async fn list_versions(&self, asset_id: &AssetId) -> Result<Vec<VersionSpec>, MetadataError> {
        self.check_available()
            .map_err(|message| MetadataError::Unavailable { message })?;

        self.assets()
            .get(asset_id)
            .map(|versions| versions.keys().cloned().collect())
            .ok_or_else(|| MetadataError::NotFound {
                asset_id: asset_id.clone(),
            })
    }

    async fn get_dependencies(
        &self,
        asset_id: &AssetId,
        version: &VersionSpec,
    ) -> Result<Vec<DependencyDecl>, MetadataError> {
        self.check_available()
            .map_err(|message| MetadataError::Unavailable { message })?;

        self.published(asset_id, version)
            .map(|p| p.dependencies)
            .ok_or_else(|| MetadataError::NotFound {
                asset_id: asset_id.clone(),
            })
    }

    async fn get_artifact(
        &self,
        asset_id: &AssetId,
        version: &VersionSpec,
    ) -> Result<ArtifactMetadata, MetadataError> {
        self.check_available()
            .map_err(|message| MetadataError::Unavailable { message })?;

        self.published(asset_id, version)
            .map(|p| p.artifact)
            .ok_or_else(|| MetadataError::NotFound {
                asset_id: asset_id.clone(),
            })
    }
}

#[async_trait]
impl ContentFetchProvider for InMemoryRegistry {
    async fn fetch(
        &self,
        asset_id: &AssetId,
        version: &VersionSpec,
    ) -> Result<Vec<u8>, FetchError> {
        self.check_available()
            .map_err(|message| FetchError::Unavailable { message })?;
        self.fetches.fetch_add(1, Ordering::SeqCst);

        self.published(asset_id, version)
            .map(|p| p.content)
            .ok_or_else(|| FetchError::NotFound {
                asset_id: asset_id.clone(),
                version: version.clone(),
            })
    }
}
