//! Resolution lock file
//!
//! Records which version and digest each asset resolved to, so a later
//! resolution can be compared against a known-good one.

use super::graph::{AssetId, DependencyGraph};
use crate::integrity::Digest;
use crate::version::VersionSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Lock file schema identifier
pub const LOCK_API_VERSION: &str = "tessera.dev/v1";

/// A resolved graph pinned to versions and digests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphLock {
    /// API version for schema compatibility
    pub api_version: String,
    /// When this lock file was generated
    pub generated: String,
    /// Locked assets, ordered by asset id
    pub assets: Vec<LockedAsset>,
}

/// One pinned asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedAsset {
    pub asset_id: AssetId,
    pub version: VersionSpec,
    pub digest: Digest,
}

/// A difference between a lock file and a fresh resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDrift {
    Added {
        asset_id: AssetId,
        version: VersionSpec,
    },
    Removed {
        asset_id: AssetId,
        version: VersionSpec,
    },
    VersionChanged {
        asset_id: AssetId,
        locked: VersionSpec,
        resolved: VersionSpec,
    },
    /// Same version, different content: always worth a security review
    DigestChanged {
        asset_id: AssetId,
        version: VersionSpec,
        locked: Digest,
        resolved: Digest,
    },
}

impl GraphLock {
    /// Pin every node of a resolved graph
    pub fn from_graph(graph: &DependencyGraph) -> Self {
        Self {
            api_version: LOCK_API_VERSION.to_string(),
            generated: chrono::Utc::now().to_rfc3339(),
            assets: graph
                .nodes()
                .map(|node| LockedAsset {
                    asset_id: node.asset_id.clone(),
                    version: node.version.clone(),
                    digest: node.digest.clone(),
                })
                .collect(),
        }
    }

    /// Parse a lock from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let lock: GraphLock =
            serde_yaml_ng::from_str(content).context("Failed to parse graph lock YAML")?;
        if lock.api_version != LOCK_API_VERSION {
            anyhow::bail!(
                "Unsupported graph lock apiVersion '{}' (expected '{}')",
                lock.api_version,
                LOCK_API_VERSION
            );
        }
        Ok(lock)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).context("Failed to serialize graph lock")
    }

    /// Load a lock file from disk
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read graph lock: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Save a lock file, creating parent directories as needed
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create lock directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, self.to_yaml()?)
            .with_context(|| format!("Failed to write graph lock: {}", path.display()))?;
        Ok(())
    }

    /// Compare this lock against a freshly resolved graph
    pub fn drift(&self, graph: &DependencyGraph) -> Vec<LockDrift> {
        let locked: BTreeMap<&AssetId, &LockedAsset> =
            self.assets.iter().map(|a| (&a.asset_id, a)).collect();

        let mut drift = Vec::new();
        for node in graph.nodes() {
            match locked.get(&node.asset_id) {
                None => drift.push(LockDrift::Added {
                    asset_id: node.asset_id.clone(),
                    version: node.version.clone(),
                }),
                Some(entry) if entry.version != node.version => {
                    drift.push(LockDrift::VersionChanged {
                        asset_id: node.asset_id.clone(),
                        locked: entry.version.clone(),
                        resolved: node.version.clone(),
                    })
                }
                Some(entry) if entry.digest != node.digest => {
                    tracing::warn!(
                        target: "security",
                        "Digest of {}@{} changed since it was locked",
                        node.asset_id,
                        node.version
                    );
                    drift.push(LockDrift::DigestChanged {
                        asset_id: node.asset_id.clone(),
                        version: node.version.clone(),
                        locked: entry.digest.clone(),
                        resolved: node.digest.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        for entry in &self.assets {
            if graph.node(&entry.asset_id).is_none() {
                drift.push(LockDrift::Removed {
                    asset_id: entry.asset_id.clone(),
                    version: entry.version.clone(),
                });
            }
        }

        drift
    }
}
