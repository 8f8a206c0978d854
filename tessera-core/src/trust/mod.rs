//! Trust Orchestrator
//!
//! Verifies every node of a finalized [`DependencyGraph`]. Nodes are
//! evaluated concurrently up to the configured worker count; each node runs
//! its checks in causal order:
//!
//! 1. cache lookup by (asset id, version, digest)
//! 2. fetch the bytes and compare their digest with the recorded one; a
//!    mismatch rejects immediately and nothing is scanned
//! 3. verify the declared signature against the injected trust anchors
//! 4. run every registered scanner concurrently, each under its own timeout
//! 5. seal the record and cache it
//!
//! A failing or timed-out scanner becomes an `Info` finding instead of
//! failing the node.

pub mod cache;
pub mod command_scanner;
pub mod fetch;
pub mod record;
pub mod scanner;

pub use cache::{CacheKey, TrustCache, DEFAULT_CACHE_TTL};
pub use command_scanner::CommandScanner;
pub use fetch::{ContentFetchProvider, FetchError};
pub use record::{
    decide, AdmissionDecision, IntegrityVerdict, ScanFinding, Severity, SignatureVerdict,
    TrustRecord,
};
pub use scanner::{RegistrationError, ScanError, Scanner, ScannerRegistry};

use crate::config::{EngineConfig, VerificationConfig};
use crate::integrity::{digest_with, SignatureVerifier, TrustAnchorStore};
use crate::resolver::{AssetId, AssetNode, DependencyGraph};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Category of findings recorded for scanner and fetch failures
pub const AVAILABILITY_CATEGORY: &str = "availability";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The batch was cancelled; no partial results are returned or cached
    #[error("Verification cancelled")]
    Cancelled,
}

/// Per-node records plus the graph-wide decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionReport {
    pub records: BTreeMap<AssetId, TrustRecord>,
    /// Most severe per-node decision; an empty graph is admitted
    pub decision: AdmissionDecision,
}

impl AdmissionReport {
    pub fn from_records(records: BTreeMap<AssetId, TrustRecord>) -> Self {
        let decision = records
            .values()
            .map(TrustRecord::decision)
            .max()
            .unwrap_or(AdmissionDecision::Admit);
        Self { records, decision }
    }

    /// Records that were not admitted cleanly, most severe first
    pub fn flagged(&self) -> Vec<&TrustRecord> {
        let mut flagged: Vec<&TrustRecord> = self
            .records
            .values()
            .filter(|r| r.decision() != AdmissionDecision::Admit)
            .collect();
        flagged.sort_by(|a, b| b.decision().cmp(&a.decision()));
        flagged
    }
}

/// Drives integrity, signature and scanner checks for resolved graphs
#[derive(Clone)]
pub struct TrustOrchestrator {
    content: Arc<dyn ContentFetchProvider>,
    scanners: Arc<ScannerRegistry>,
    cache: Arc<TrustCache>,
    config: VerificationConfig,
}

impl TrustOrchestrator {
    pub fn new(
        content: Arc<dyn ContentFetchProvider>,
        scanners: ScannerRegistry,
        config: VerificationConfig,
    ) -> Self {
        let cache = Arc::new(TrustCache::new(config.cache_ttl()));
        Self {
            content,
            scanners: Arc::new(scanners),
            cache,
            config,
        }
    }

    /// Build an orchestrator with the command scanners named in `config`
    pub fn from_config(
        content: Arc<dyn ContentFetchProvider>,
        config: &EngineConfig,
    ) -> Result<Self, RegistrationError> {
        let mut scanners = ScannerRegistry::new();
        for scanner in &config.scanners {
            scanners.register(Arc::new(CommandScanner::from_config(scanner)))?;
        }
        Ok(Self::new(content, scanners, config.verification.clone()))
    }

    /// Share a cache with other orchestrators
    pub fn with_cache(mut self, cache: Arc<TrustCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<TrustCache> {
        &self.cache
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Verify every node of `graph`
    pub async fn verify(
        &self,
        graph: &DependencyGraph,
        anchors: &dyn TrustAnchorStore,
    ) -> BTreeMap<AssetId, TrustRecord> {
        let never = CancellationToken::new();
        self.evaluate_graph(graph, anchors, &never)
            .await
            .into_iter()
            .flatten()
            .map(|record| (record.asset_id().clone(), record))
            .collect()
    }

    /// Verify every node of `graph`, abandoning the batch if `cancel` fires
    ///
    /// After cancellation, in-flight checks get the configured grace period
    /// to finish; their results are discarded either way.
    pub async fn verify_with_cancel(
        &self,
        graph: &DependencyGraph,
        anchors: &dyn TrustAnchorStore,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<AssetId, TrustRecord>, VerificationError> {
        let batch = self.evaluate_graph(graph, anchors, cancel);
        tokio::pin!(batch);

        let outcomes = tokio::select! {
            biased;
            outcomes = &mut batch => outcomes,
            _ = cancel.cancelled() => {
                let grace = self.config.cancellation_grace();
                warn!("Verification cancelled; waiting up to {:?} for in-flight checks", grace);
                if tokio::time::timeout(grace, &mut batch).await.is_err() {
                    warn!("Abandoning in-flight checks after grace period");
                }
                return Err(VerificationError::Cancelled);
            }
        };

        if cancel.is_cancelled() || outcomes.iter().any(Option::is_none) {
            return Err(VerificationError::Cancelled);
        }
        Ok(outcomes
            .into_iter()
            .flatten()
            .map(|record| (record.asset_id().clone(), record))
            .collect())
    }

    /// Verify `graph` and fold the records into one decision
    pub async fn admit(
        &self,
        graph: &DependencyGraph,
        anchors: &dyn TrustAnchorStore,
    ) -> AdmissionReport {
        let report = AdmissionReport::from_records(self.verify(graph, anchors).await);
        info!(
            "Admission decision for {} node(s): {}",
            report.records.len(),
            report.decision
        );
        report
    }

    /// One outcome per node; `None` marks an evaluation cut short by `cancel`
    async fn evaluate_graph(
        &self,
        graph: &DependencyGraph,
        anchors: &dyn TrustAnchorStore,
        cancel: &CancellationToken,
    ) -> Vec<Option<TrustRecord>> {
        let now = Utc::now();
        let workers = self.config.worker_count();
        debug!("Verifying {} node(s) with {} worker(s)", graph.len(), workers);

        futures::stream::iter(graph.nodes())
            .map(|node| self.evaluate(node, anchors, now, cancel))
            .buffer_unordered(workers)
            .collect()
            .await
    }

    async fn evaluate(
        &self,
        node: &AssetNode,
        anchors: &dyn TrustAnchorStore,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<TrustRecord> {
        if cancel.is_cancelled() {
            return None;
        }

        let seal = |integrity: IntegrityVerdict,
                    signature: Option<SignatureVerdict>,
                    findings: Vec<ScanFinding>| {
            TrustRecord::seal(
                node.asset_id.clone(),
                node.version.clone(),
                node.digest.clone(),
                integrity,
                signature,
                findings,
                &self.config,
            )
        };

        // Cached digest and scan results are reused; the signature is always
        // judged against this call's anchors and this orchestrator's policy
        let key = CacheKey::for_node(node);
        if let Some(cached) = self.cache.get(&key).await {
            let signature = self.check_signature(node, anchors, now);
            let current = seal(
                IntegrityVerdict::Verified,
                Some(signature),
                cached.findings().to_vec(),
            );
            if current.signature() == cached.signature()
                && current.decision() == cached.decision()
                && current.reasons() == cached.reasons()
            {
                debug!("Using cached trust record for {}@{}", node.asset_id, node.version);
                return Some(cached);
            }

            debug!(
                "Cached trust record for {}@{} no longer holds, re-sealed: {}",
                node.asset_id,
                node.version,
                current.decision()
            );
            current.log_if_security_critical();
            return Some(current);
        }

        let bytes = match self.content.fetch(&node.asset_id, &node.version).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to fetch {}@{}: {}", node.asset_id, node.version, e);
                let finding = ScanFinding::new(
                    "fetch",
                    Severity::Info,
                    AVAILABILITY_CATEGORY,
                    format!("content unavailable: {e}"),
                );
                return Some(seal(
                    IntegrityVerdict::Unavailable {
                        reason: e.to_string(),
                    },
                    None,
                    vec![finding],
                ));
            }
        };

        let actual = digest_with(node.digest.algorithm(), &bytes);
        if actual != node.digest {
            let record = seal(
                IntegrityVerdict::Mismatch {
                    expected: node.digest.clone(),
                    actual,
                },
                None,
                Vec::new(),
            );
            record.log_if_security_critical();
            return Some(record);
        }

        let signature = self.check_signature(node, anchors, now);
        let findings = self.scan(node, &bytes).await;
        let record = seal(IntegrityVerdict::Verified, Some(signature), findings);
        record.log_if_security_critical();

        if cancel.is_cancelled() {
            debug!(
                "Discarding trust record for {}@{} sealed after cancellation",
                node.asset_id, node.version
            );
            return None;
        }

        self.cache.insert(record.clone()).await;
        debug!(
            "Sealed trust record for {}@{}: {}",
            node.asset_id,
            node.version,
            record.decision()
        );
        Some(record)
    }

    fn check_signature(
        &self,
        node: &AssetNode,
        anchors: &dyn TrustAnchorStore,
        now: DateTime<Utc>,
    ) -> SignatureVerdict {
        let Some(declared) = &node.signature else {
            return SignatureVerdict::Unsigned;
        };

        let verifier = SignatureVerifier::new(anchors, now);
        match verifier.verify_artifact(
            node.asset_id.as_str(),
            &node.version,
            &node.digest,
            node.size,
            declared,
        ) {
            Ok(()) => SignatureVerdict::Valid {
                key_fingerprint: declared.key_fingerprint.clone(),
            },
            Err(e) => {
                e.log_if_security_critical();
                e.into()
            }
        }
    }

    /// Run all scanners concurrently and collect their findings
    async fn scan(&self, node: &AssetNode, bytes: &[u8]) -> Vec<ScanFinding> {
        let runs = self.scanners.iter().map(|scanner| async move {
            let name = scanner.name().to_string();
            let limit = scanner.timeout().unwrap_or_else(|| self.config.scanner_timeout());

            match tokio::time::timeout(limit, scanner.scan(bytes)).await {
                Ok(Ok(findings)) => findings
                    .into_iter()
                    .map(|f| ScanFinding { scanner: name.clone(), ..f })
                    .collect(),
                Ok(Err(e)) => {
                    warn!("Scanner '{}' failed on {}@{}: {}", name, node.asset_id, node.version, e);
                    vec![ScanFinding::new(
                        name,
                        Severity::Info,
                        AVAILABILITY_CATEGORY,
                        format!("scanner unavailable: {e}"),
                    )]
                }
                Err(_) => {
                    warn!(
                        "Scanner '{}' timed out after {:?} on {}@{}",
                        name, limit, node.asset_id, node.version
                    );
                    vec![ScanFinding::new(
                        name,
                        Severity::Info,
                        AVAILABILITY_CATEGORY,
                        format!("scanner unavailable: timed out after {limit:?}"),
                    )]
                }
            }
        });

        join_all(runs).await.into_iter().flatten().collect()
    }
}
