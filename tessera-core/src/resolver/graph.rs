//! Resolved dependency graph types
//!
//! A [`DependencyGraph`] is only ever built by the resolver's finalize step.
//! It owns its nodes outright and hands out shared references, so a
//! finalized graph cannot be mutated in place.

use crate::integrity::{ArtifactSignature, Digest};
use crate::version::{VersionRequirement, VersionSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque, stable asset identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A dependency as declared by one asset version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDecl {
    pub asset_id: AssetId,
    pub requirement: VersionRequirement,
    #[serde(default)]
    pub optional: bool,
}

impl DependencyDecl {
    pub fn required(asset_id: impl Into<AssetId>, requirement: VersionRequirement) -> Self {
        Self {
            asset_id: asset_id.into(),
            requirement,
            optional: false,
        }
    }

    pub fn optional(asset_id: impl Into<AssetId>, requirement: VersionRequirement) -> Self {
        Self {
            asset_id: asset_id.into(),
            requirement,
            optional: true,
        }
    }
}

/// Where a requirement on an asset came from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "asset_id")]
pub enum RequirementSource {
    Root,
    Dependent(AssetId),
}

impl fmt::Display for RequirementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementSource::Root => f.write_str("root"),
            RequirementSource::Dependent(id) => write!(f, "{id}"),
        }
    }
}

/// A requirement together with the asset that imposed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedRequirement {
    pub source: RequirementSource,
    pub requirement: VersionRequirement,
    #[serde(default)]
    pub optional: bool,
}

impl fmt::Display for SourcedRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {})", self.requirement, self.source)?;
        if self.optional {
            f.write_str(" [optional]")?;
        }
        Ok(())
    }
}

/// Why a particular version was chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SelectionReason {
    /// Highest release among `candidates` versions satisfying every requirement
    HighestSatisfying { candidates: usize },
    /// A pre-release named explicitly by an exact requirement
    ExactPrerelease,
}

/// An optional dependency left out of the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub dependency: AssetId,
    pub requirement: VersionRequirement,
    pub message: String,
}

/// Resolution bookkeeping attached to each node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionMetadata {
    pub reason: SelectionReason,
    /// Every requirement that constrained this node in the final graph
    pub requirements: Vec<SourcedRequirement>,
    /// Optional dependencies of this node that were omitted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<Advisory>,
    /// Versions selected earlier in the session and later revised
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<VersionSpec>,
    /// Shortest distance from a root
    pub depth: usize,
}

/// One resolved (asset, version) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetNode {
    pub asset_id: AssetId,
    pub version: VersionSpec,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ArtifactSignature>,
    pub dependencies: Vec<DependencyDecl>,
    pub resolution: ResolutionMetadata,
}

/// A requirement the caller asked the resolver to satisfy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRequirement {
    pub asset_id: AssetId,
    pub requirement: VersionRequirement,
}

/// A directed edge from a node to the asset it depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: AssetId,
    pub target: AssetId,
    pub requirement: VersionRequirement,
}

/// A finalized, acyclic resolution result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyGraph {
    roots: Vec<RootRequirement>,
    nodes: BTreeMap<AssetId, AssetNode>,
    edges: Vec<Edge>,
}

impl DependencyGraph {
    /// Assemble a graph; callers must already have checked acyclicity
    pub(crate) fn finalized(
        roots: Vec<RootRequirement>,
        nodes: BTreeMap<AssetId, AssetNode>,
        mut edges: Vec<Edge>,
    ) -> Self {
        edges.sort_by(|a, b| {
            (&a.source, &a.target, a.requirement.to_string())
                .cmp(&(&b.source, &b.target, b.requirement.to_string()))
        });
        edges.dedup();
        debug_assert!(edges
            .iter()
            .all(|e| nodes.contains_key(&e.source) && nodes.contains_key(&e.target)));

        Self {
            roots,
            nodes,
            edges,
        }
    }

    pub fn roots(&self) -> &[RootRequirement] {
        &self.roots
    }

    /// Nodes in asset-id order
    pub fn nodes(&self) -> impl Iterator<Item = &AssetNode> {
        self.nodes.values()
    }

    pub fn node(&self, asset_id: &AssetId) -> Option<&AssetNode> {
        self.nodes.get(asset_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_from<'a>(&'a self, source: &'a AssetId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.source == source)
    }

    /// Node ids ordered so that every dependency precedes its dependents
    pub fn topological_order(&self) -> Vec<&AssetId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = BTreeSet::new();

        // Post-order walk; the graph is acyclic so no on-stack tracking is needed
        fn visit<'g>(
            graph: &'g DependencyGraph,
            id: &'g AssetId,
            visited: &mut BTreeSet<&'g AssetId>,
            order: &mut Vec<&'g AssetId>,
        ) {
            if !visited.insert(id) {
                return;
            }
            for edge in graph.edges_from(id) {
                visit(graph, &edge.target, visited, order);
            }
            order.push(id);
        }

        for id in self.nodes.keys() {
            visit(self, id, &mut visited, &mut order);
        }
        order
    }
}
