//! Dependency Resolver
//!
//! Resolution runs as a session that moves through
//! `Pending -> Expanding -> Resolved | Failed`. Expansion is a breadth-first
//! worklist over asset ids:
//!
//! - every asset keeps the full set of requirements imposed on it, each
//!   tagged with its source (a root or the dependent asset)
//! - the selected version is the highest release satisfying all of them;
//!   pre-releases are only eligible when an exact requirement names them
//! - when a new requirement invalidates a selection the asset is re-selected,
//!   the requirements its previous version imposed are withdrawn, and the
//!   affected assets are revisited
//!
//! Once the worklist drains, finalize walks the selection from the roots,
//! rejecting cycles and graphs deeper than the configured limit, and builds
//! the immutable [`DependencyGraph`].
//!
//! Expansion is sequential on purpose. All candidate lists are sorted and all
//! bookkeeping uses ordered maps, so identical provider answers always yield
//! identical graphs.

pub mod error;
pub mod graph;
pub mod lock;
pub mod provider;

pub use error::ResolutionError;
pub use graph::{
    Advisory, AssetId, AssetNode, DependencyDecl, DependencyGraph, Edge, RequirementSource,
    ResolutionMetadata, RootRequirement, SelectionReason, SourcedRequirement,
};
pub use lock::{GraphLock, LockDrift, LockedAsset};
pub use provider::{ArtifactMetadata, MetadataError, MetadataProvider};

use crate::config::ResolverConfig;
use crate::version::{VersionRequirement, VersionSpec};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a resolution session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Pending,
    Expanding,
    Resolved,
    Failed,
}

/// Resolves root requirements into a dependency graph
#[derive(Clone)]
pub struct Resolver {
    provider: Arc<dyn MetadataProvider>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(provider: Arc<dyn MetadataProvider>, config: ResolverConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Open a session for the given roots without running it
    pub fn session(&self, roots: &[(AssetId, VersionRequirement)]) -> ResolutionSession<'_> {
        ResolutionSession::new(self, roots)
    }

    /// Resolve the given roots to completion
    pub async fn resolve(
        &self,
        roots: &[(AssetId, VersionRequirement)],
    ) -> Result<DependencyGraph, ResolutionError> {
        self.session(roots).run().await
    }
}

/// The version currently chosen for one asset during expansion
#[derive(Debug, Clone)]
struct Selection {
    version: VersionSpec,
    reason: SelectionReason,
    artifact: ArtifactMetadata,
    dependencies: Vec<DependencyDecl>,
    superseded: Vec<VersionSpec>,
}

/// One resolution run over a fixed set of roots
pub struct ResolutionSession<'r> {
    resolver: &'r Resolver,
    roots: Vec<RootRequirement>,
    state: ResolutionState,
    cancel: CancellationToken,

    available: BTreeMap<AssetId, Vec<VersionSpec>>,
    constraints: BTreeMap<AssetId, Vec<SourcedRequirement>>,
    selected: BTreeMap<AssetId, Selection>,
    advisories: BTreeMap<AssetId, Vec<Advisory>>,
    depth: BTreeMap<AssetId, usize>,
    revisions: BTreeMap<AssetId, usize>,
    queue: VecDeque<AssetId>,
    queued: BTreeSet<AssetId>,
    /// Consecutive worklist steps that only deferred a conflict
    stalled: usize,
}

impl<'r> ResolutionSession<'r> {
    fn new(resolver: &'r Resolver, roots: &[(AssetId, VersionRequirement)]) -> Self {
        Self {
            resolver,
            roots: roots
                .iter()
                .map(|(asset_id, requirement)| RootRequirement {
                    asset_id: asset_id.clone(),
                    requirement: requirement.clone(),
                })
                .collect(),
            state: ResolutionState::Pending,
            cancel: CancellationToken::new(),
            available: BTreeMap::new(),
            constraints: BTreeMap::new(),
            selected: BTreeMap::new(),
            advisories: BTreeMap::new(),
            depth: BTreeMap::new(),
            revisions: BTreeMap::new(),
            queue: VecDeque::new(),
            queued: BTreeSet::new(),
            stalled: 0,
        }
    }

    /// Attach a cancellation signal checked between expansion steps
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> ResolutionState {
        self.state
    }

    /// Run the session; running again starts over from the roots
    pub async fn run(&mut self) -> Result<DependencyGraph, ResolutionError> {
        self.reset();
        self.state = ResolutionState::Expanding;
        debug!("Resolving {} root requirement(s)", self.roots.len());

        let result = match self.expand().await {
            Ok(()) => self.finalize(),
            Err(e) => Err(e),
        };

        match &result {
            Ok(graph) => {
                self.state = ResolutionState::Resolved;
                info!(
                    "Resolution complete: {} node(s), {} edge(s)",
                    graph.len(),
                    graph.edges().len()
                );
            }
            Err(e) => {
                self.state = ResolutionState::Failed;
                warn!("Resolution failed: {}", e);
            }
        }
        result
    }

    fn reset(&mut self) {
        self.available.clear();
        self.constraints.clear();
        self.selected.clear();
        self.advisories.clear();
        self.depth.clear();
        self.revisions.clear();
        self.queue.clear();
        self.queued.clear();
        self.stalled = 0;
    }

    async fn expand(&mut self) -> Result<(), ResolutionError> {
        for root in self.roots.clone() {
            self.constraints
                .entry(root.asset_id.clone())
                .or_default()
                .push(SourcedRequirement {
                    source: RequirementSource::Root,
                    requirement: root.requirement,
                    optional: false,
                });
            self.depth.insert(root.asset_id.clone(), 0);
            self.enqueue(root.asset_id);
        }

        while let Some(asset_id) = self.queue.pop_front() {
            if self.cancel.is_cancelled() {
                return Err(ResolutionError::Cancelled);
            }
            self.queued.remove(&asset_id);
            let stalled = self.stalled;
            self.reconcile(&asset_id).await?;
            if self.stalled == stalled {
                self.stalled = 0;
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, asset_id: AssetId) {
        if self.queued.insert(asset_id.clone()) {
            self.queue.push_back(asset_id);
        }
    }

    /// Bring one asset's selection in line with its current requirements
    async fn reconcile(&mut self, asset_id: &AssetId) -> Result<(), ResolutionError> {
        let requirements = self.constraints.get(asset_id).cloned().unwrap_or_default();

        if requirements.is_empty() {
            // Nothing refers to this asset any more
            if self.selected.remove(asset_id).is_some() {
                debug!("Dropping unreferenced asset {}", asset_id);
                self.withdraw(asset_id);
            }
            return Ok(());
        }

        let max_depth = self.resolver.config.max_depth;
        if self.depth.get(asset_id).copied().unwrap_or(0) > max_depth {
            return Err(ResolutionError::DepthExceeded {
                asset_id: asset_id.clone(),
                max_depth,
            });
        }

        let available = self.available_versions(asset_id).await?;

        let (version, reason) = match choose(&available, &requirements) {
            Some(choice) => choice,
            None => match self.drop_unsatisfiable_optionals(asset_id, &available, &requirements) {
                Some(choice) => choice,
                None if requirements.iter().all(|r| r.optional) => return Ok(()),
                None if self.defer_conflict(asset_id, &requirements) => return Ok(()),
                None => {
                    return Err(ResolutionError::Conflict {
                        asset_id: asset_id.clone(),
                        requirements,
                    })
                }
            },
        };

        if let Some(current) = self.selected.get_mut(asset_id) {
            if current.version == version {
                current.reason = reason;
                return Ok(());
            }
        }

        let mut superseded = Vec::new();
        if let Some(previous) = self.selected.remove(asset_id) {
            let revisions = self.revisions.entry(asset_id.clone()).or_insert(0);
            *revisions += 1;
            // Each revision must land on a different candidate; more than that means oscillation
            if *revisions > available.len() {
                return Err(ResolutionError::Conflict {
                    asset_id: asset_id.clone(),
                    requirements,
                });
            }
            debug!(
                "Revising {} from {} to {} after new requirements",
                asset_id, previous.version, version
            );
            superseded = previous.superseded;
            superseded.push(previous.version);
            self.withdraw(asset_id);
        }

        self.select(asset_id, version, reason, superseded).await
    }

    /// Record a selection and impose the chosen version's dependencies
    async fn select(
        &mut self,
        asset_id: &AssetId,
        version: VersionSpec,
        reason: SelectionReason,
        superseded: Vec<VersionSpec>,
    ) -> Result<(), ResolutionError> {
        let provider = &self.resolver.provider;
        let artifact = provider
            .get_artifact(asset_id, &version)
            .await
            .map_err(|source| ResolutionError::Provider {
                asset_id: asset_id.clone(),
                source,
            })?;
        let dependencies = provider
            .get_dependencies(asset_id, &version)
            .await
            .map_err(|source| ResolutionError::Provider {
                asset_id: asset_id.clone(),
                source,
            })?;

        debug!(
            "Selected {}@{} with {} dependencies",
            asset_id,
            version,
            dependencies.len()
        );

        let child_depth = self.depth.get(asset_id).copied().unwrap_or(0) + 1;
        for dep in &dependencies {
            self.constraints
                .entry(dep.asset_id.clone())
                .or_default()
                .push(SourcedRequirement {
                    source: RequirementSource::Dependent(asset_id.clone()),
                    requirement: dep.requirement.clone(),
                    optional: dep.optional,
                });
            let depth = self.depth.entry(dep.asset_id.clone()).or_insert(child_depth);
            *depth = (*depth).min(child_depth);
            self.enqueue(dep.asset_id.clone());
        }

        self.selected.insert(
            asset_id.clone(),
            Selection {
                version,
                reason,
                artifact,
                dependencies,
                superseded,
            },
        );
        Ok(())
    }

    /// Remove every requirement `source` imposed and revisit the targets
    fn withdraw(&mut self, source: &AssetId) {
        let source = RequirementSource::Dependent(source.clone());
        let mut affected = Vec::new();

        for (target, requirements) in self.constraints.iter_mut() {
            let before = requirements.len();
            requirements.retain(|r| r.source != source);
            if requirements.len() != before {
                affected.push(target.clone());
            }
        }

        if let RequirementSource::Dependent(id) = &source {
            self.advisories.remove(id);
        }
        for target in affected {
            self.enqueue(target);
        }
    }

    /// Put a conflicting asset back on the worklist while a source of its
    /// requirements is itself waiting to be reconciled
    ///
    /// That source may be revised and withdraw the offending requirement. Once
    /// a full pass over the worklist has done nothing but defer, no revision
    /// is pending and the conflict stands.
    fn defer_conflict(&mut self, asset_id: &AssetId, requirements: &[SourcedRequirement]) -> bool {
        let pending = requirements.iter().any(|r| match &r.source {
            RequirementSource::Dependent(source) => self.queued.contains(source),
            RequirementSource::Root => false,
        });
        if !pending || self.stalled > self.queue.len() {
            return false;
        }

        debug!("Deferring conflict on {} until its dependents are reconciled", asset_id);
        self.stalled += 1;
        self.enqueue(asset_id.clone());
        true
    }

    /// Try again without the optional requirements that cannot be met
    ///
    /// Returns the choice made from the remaining requirements, or `None` when
    /// the mandatory requirements alone are unsatisfiable. When every
    /// requirement is optional they are all dropped and `None` is returned.
    fn drop_unsatisfiable_optionals(
        &mut self,
        asset_id: &AssetId,
        available: &[VersionSpec],
        requirements: &[SourcedRequirement],
    ) -> Option<(VersionSpec, SelectionReason)> {
        let mandatory: Vec<SourcedRequirement> =
            requirements.iter().filter(|r| !r.optional).cloned().collect();

        let keep: Vec<SourcedRequirement> = if mandatory.is_empty() {
            Vec::new()
        } else {
            let (base, _) = choose(available, &mandatory)?;
            requirements
                .iter()
                .filter(|r| !r.optional || r.requirement.satisfies(&base))
                .cloned()
                .collect()
        };

        for dropped in requirements.iter().filter(|r| !keep.contains(r)) {
            if let RequirementSource::Dependent(parent) = &dropped.source {
                warn!(
                    "Omitting optional dependency {} {} of {}: no satisfying version",
                    asset_id, dropped.requirement, parent
                );
                self.advisories.entry(parent.clone()).or_default().push(Advisory {
                    dependency: asset_id.clone(),
                    requirement: dropped.requirement.clone(),
                    message: format!(
                        "optional dependency {} {} omitted: no satisfying version available",
                        asset_id, dropped.requirement
                    ),
                });
            }
        }

        self.constraints.insert(asset_id.clone(), keep.clone());
        if keep.is_empty() {
            if self.selected.remove(asset_id).is_some() {
                self.withdraw(asset_id);
            }
            return None;
        }
        choose(available, &keep)
    }

    /// Available versions, highest first, fetched once per session
    async fn available_versions(
        &mut self,
        asset_id: &AssetId,
    ) -> Result<Vec<VersionSpec>, ResolutionError> {
        if let Some(versions) = self.available.get(asset_id) {
            return Ok(versions.clone());
        }

        let mut versions = match self.resolver.provider.list_versions(asset_id).await {
            Ok(versions) => versions,
            Err(MetadataError::NotFound { .. }) => Vec::new(),
            Err(source) => {
                return Err(ResolutionError::Provider {
                    asset_id: asset_id.clone(),
                    source,
                })
            }
        };
        versions.sort_by(|a, b| b.cmp(a).then_with(|| b.to_string().cmp(&a.to_string())));
        versions.dedup();

        self.available.insert(asset_id.clone(), versions.clone());
        Ok(versions)
    }

    /// Walk the selection from the roots and build the finalized graph
    fn finalize(&self) -> Result<DependencyGraph, ResolutionError> {
        // Active edges are exactly the requirements still held by a selected source
        let mut adjacency: BTreeMap<&AssetId, Vec<(&AssetId, &VersionRequirement)>> =
            BTreeMap::new();
        for (target, requirements) in &self.constraints {
            for r in requirements {
                if let RequirementSource::Dependent(source) = &r.source {
                    if self.selected.contains_key(source) {
                        adjacency.entry(source).or_default().push((target, &r.requirement));
                    }
                }
            }
        }

        let root_ids: BTreeSet<&AssetId> = self.roots.iter().map(|r| &r.asset_id).collect();

        // Cycle detection over an explicit visitation stack
        let mut stack: Vec<&AssetId> = Vec::new();
        let mut done: BTreeSet<&AssetId> = BTreeSet::new();
        for root in root_ids.iter().copied() {
            detect_cycle(root, &adjacency, &mut stack, &mut done)?;
        }

        // Breadth-first depths from the roots
        let max_depth = self.resolver.config.max_depth;
        let mut depths: BTreeMap<&AssetId, usize> = BTreeMap::new();
        let mut frontier: VecDeque<&AssetId> = VecDeque::new();
        for root in root_ids.iter().copied() {
            depths.insert(root, 0);
            frontier.push_back(root);
        }
        while let Some(id) = frontier.pop_front() {
            let depth = depths[id];
            if depth > max_depth {
                return Err(ResolutionError::DepthExceeded {
                    asset_id: id.clone(),
                    max_depth,
                });
            }
            for &(next, _) in adjacency.get(id).map(Vec::as_slice).unwrap_or_default() {
                if !depths.contains_key(next) {
                    depths.insert(next, depth + 1);
                    frontier.push_back(next);
                }
            }
        }

        let mut nodes = BTreeMap::new();
        for (id, depth) in &depths {
            let selection = self.selected.get(*id).ok_or_else(|| ResolutionError::Conflict {
                asset_id: (*id).clone(),
                requirements: self.constraints.get(*id).cloned().unwrap_or_default(),
            })?;

            let requirements = self
                .constraints
                .get(*id)
                .map(|all| {
                    all.iter()
                        .filter(|r| match &r.source {
                            RequirementSource::Root => true,
                            RequirementSource::Dependent(source) => depths.contains_key(source),
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            nodes.insert(
                (*id).clone(),
                AssetNode {
                    asset_id: (*id).clone(),
                    version: selection.version.clone(),
                    digest: selection.artifact.digest.clone(),
                    size: selection.artifact.size,
                    signature: selection.artifact.signature.clone(),
                    dependencies: selection.dependencies.clone(),
                    resolution: ResolutionMetadata {
                        reason: selection.reason.clone(),
                        requirements,
                        advisories: self.advisories.get(*id).cloned().unwrap_or_default(),
                        superseded: selection.superseded.clone(),
                        depth: *depth,
                    },
                },
            );
        }

        let edges = adjacency
            .iter()
            .filter(|(source, _)| depths.contains_key(*source))
            .flat_map(|(source, targets)| {
                targets.iter().map(move |(target, requirement)| Edge {
                    source: (*source).clone(),
                    target: (*target).clone(),
                    requirement: (*requirement).clone(),
                })
            })
            .collect();

        Ok(DependencyGraph::finalized(self.roots.clone(), nodes, edges))
    }
}

/// Depth-first walk that fails on the first back edge
fn detect_cycle<'a>(
    id: &'a AssetId,
    adjacency: &BTreeMap<&'a AssetId, Vec<(&'a AssetId, &'a VersionRequirement)>>,
    stack: &mut Vec<&'a AssetId>,
    done: &mut BTreeSet<&'a AssetId>,
) -> Result<(), ResolutionError> {
    if let Some(start) = stack.iter().position(|on_stack| *on_stack == id) {
        return Err(ResolutionError::Cycle {
            path: stack[start..].iter().map(|id| (*id).clone()).collect(),
        });
    }
    if done.contains(id) {
        return Ok(());
    }

    stack.push(id);
    if let Some(targets) = adjacency.get(id) {
        for &(next, _) in targets {
            detect_cycle(next, adjacency, stack, done)?;
        }
    }
    stack.pop();
    done.insert(id);
    Ok(())
}

/// Pick the highest eligible version satisfying every requirement
///
/// `available` must be sorted highest first.
fn choose(
    available: &[VersionSpec],
    requirements: &[SourcedRequirement],
) -> Option<(VersionSpec, SelectionReason)> {
    let named_prereleases: Vec<&VersionSpec> = requirements
        .iter()
        .filter_map(|r| r.requirement.exact_prerelease())
        .collect();

    let candidates: Vec<&VersionSpec> = available
        .iter()
        .filter(|v| !v.is_prerelease() || named_prereleases.contains(v))
        .filter(|v| requirements.iter().all(|r| r.requirement.satisfies(v)))
        .collect();

    let best = candidates.first()?;
    let reason = if best.is_prerelease() {
        SelectionReason::ExactPrerelease
    } else {
        SelectionReason::HighestSatisfying {
            candidates: candidates.len(),
        }
    };
    Some(((*best).clone(), reason))
}
