//! Trust records and the admission decision
//!
//! A [`TrustRecord`] is sealed exactly once, after every check for its node
//! has finished. It has no setters; the decision is derived from the verdicts
//! at sealing time by [`decide`].

use crate::config::{UnsignedPolicy, VerificationConfig};
use crate::integrity::{Digest, SignatureError};
use crate::resolver::AssetId;
use crate::version::VersionSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finding severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One result reported by a scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFinding {
    /// Registered name of the scanner that produced this finding
    pub scanner: String,
    pub severity: Severity,
    pub category: String,
    pub description: String,
}

impl ScanFinding {
    pub fn new(
        scanner: impl Into<String>,
        severity: Severity,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            scanner: scanner.into(),
            severity,
            category: category.into(),
            description: description.into(),
        }
    }
}

/// Outcome of comparing fetched bytes with the recorded digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum IntegrityVerdict {
    Verified,
    Mismatch { expected: Digest, actual: Digest },
    /// The bytes could not be fetched, so nothing was verified
    Unavailable { reason: String },
}

impl IntegrityVerdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, IntegrityVerdict::Verified)
    }
}

/// Outcome of checking an artifact's declared signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SignatureVerdict {
    Valid { key_fingerprint: String },
    Invalid { key_fingerprint: String, reason: String },
    KeyUnknown { key_fingerprint: String },
    Revoked {
        key_fingerprint: String,
        revoked_at: DateTime<Utc>,
    },
    Unsigned,
}

impl From<SignatureError> for SignatureVerdict {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::UnknownKey { fingerprint } => SignatureVerdict::KeyUnknown {
                key_fingerprint: fingerprint,
            },
            SignatureError::Revoked {
                fingerprint,
                revoked_at,
            } => SignatureVerdict::Revoked {
                key_fingerprint: fingerprint,
                revoked_at,
            },
            SignatureError::Invalid {
                fingerprint,
                reason,
            } => SignatureVerdict::Invalid {
                key_fingerprint: fingerprint,
                reason,
            },
        }
    }
}

/// Final admission verdict, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDecision {
    Admit,
    AdmitWithWarnings,
    Reject,
}

impl fmt::Display for AdmissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdmissionDecision::Admit => "admit",
            AdmissionDecision::AdmitWithWarnings => "admit with warnings",
            AdmissionDecision::Reject => "reject",
        };
        f.write_str(s)
    }
}

/// Aggregate verdicts into a decision plus the reasons behind it
///
/// `signature` is `None` when the signature was never checked because
/// integrity failed first.
pub fn decide(
    integrity: &IntegrityVerdict,
    signature: Option<&SignatureVerdict>,
    findings: &[ScanFinding],
    config: &VerificationConfig,
) -> (AdmissionDecision, Vec<String>) {
    let mut decision = AdmissionDecision::Admit;
    let mut reasons = Vec::new();
    let mut raise = |to: AdmissionDecision, reason: String| {
        decision = decision.max(to);
        reasons.push(reason);
    };

    match integrity {
        IntegrityVerdict::Verified => {}
        IntegrityVerdict::Mismatch { expected, actual } => raise(
            AdmissionDecision::Reject,
            format!("content digest {actual} does not match recorded {expected}"),
        ),
        IntegrityVerdict::Unavailable { reason } => raise(
            AdmissionDecision::Reject,
            format!("content could not be verified: {reason}"),
        ),
    }

    let by_policy = |policy: UnsignedPolicy| match policy {
        UnsignedPolicy::Permissive => AdmissionDecision::AdmitWithWarnings,
        UnsignedPolicy::Strict => AdmissionDecision::Reject,
    };
    match signature {
        None | Some(SignatureVerdict::Valid { .. }) => {}
        Some(SignatureVerdict::Invalid { reason, .. }) => {
            raise(AdmissionDecision::Reject, format!("invalid signature: {reason}"))
        }
        Some(SignatureVerdict::Revoked {
            key_fingerprint, ..
        }) => raise(
            AdmissionDecision::Reject,
            format!("signed with revoked key {key_fingerprint}"),
        ),
        Some(SignatureVerdict::KeyUnknown { key_fingerprint }) => raise(
            by_policy(config.unknown_key_policy),
            format!("signed with unknown key {key_fingerprint}"),
        ),
        Some(SignatureVerdict::Unsigned) => {
            raise(by_policy(config.unsigned_policy), "artifact is unsigned".to_string())
        }
    }

    for finding in findings {
        let to = match finding.severity {
            Severity::Critical => AdmissionDecision::Reject,
            Severity::High | Severity::Medium => AdmissionDecision::AdmitWithWarnings,
            Severity::Low | Severity::Info => continue,
        };
        raise(
            to,
            format!(
                "{} finding from {}: {}",
                finding.severity, finding.scanner, finding.category
            ),
        );
    }

    (decision, reasons)
}

/// The sealed outcome of verifying one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustRecord {
    asset_id: AssetId,
    version: VersionSpec,
    digest: Digest,
    integrity: IntegrityVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<SignatureVerdict>,
    findings: Vec<ScanFinding>,
    decision: AdmissionDecision,
    reasons: Vec<String>,
    sealed_at: DateTime<Utc>,
}

impl TrustRecord {
    /// Derive the decision and freeze the record
    pub fn seal(
        asset_id: AssetId,
        version: VersionSpec,
        digest: Digest,
        integrity: IntegrityVerdict,
        signature: Option<SignatureVerdict>,
        mut findings: Vec<ScanFinding>,
        config: &VerificationConfig,
    ) -> Self {
        // Scanners finish in any order
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.scanner.cmp(&b.scanner))
                .then_with(|| a.category.cmp(&b.category))
                .then_with(|| a.description.cmp(&b.description))
        });

        let (decision, reasons) = decide(&integrity, signature.as_ref(), &findings, config);

        Self {
            asset_id,
            version,
            digest,
            integrity,
            signature,
            findings,
            decision,
            reasons,
            sealed_at: Utc::now(),
        }
    }

    pub fn asset_id(&self) -> &AssetId {
        &self.asset_id
    }

    pub fn version(&self) -> &VersionSpec {
        &self.version
    }

    /// The digest recorded for the node, which is also the cache key digest
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn integrity(&self) -> &IntegrityVerdict {
        &self.integrity
    }

    pub fn signature(&self) -> Option<&SignatureVerdict> {
        self.signature.as_ref()
    }

    /// Findings, most severe first
    pub fn findings(&self) -> &[ScanFinding] {
        &self.findings
    }

    pub fn decision(&self) -> AdmissionDecision {
        self.decision
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.sealed_at
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// Log rejections caused by tampering, bad signatures or critical findings
    pub fn log_if_security_critical(&self) {
        if let IntegrityVerdict::Mismatch { expected, actual } = &self.integrity {
            tracing::error!(
                target: "security",
                "INTEGRITY VIOLATION: {}@{} expected {} but content hashes to {}",
                self.asset_id,
                self.version,
                expected,
                actual
            );
        }
        for finding in self.findings.iter().filter(|f| f.severity == Severity::Critical) {
            tracing::error!(
                target: "security",
                "CRITICAL FINDING: {}@{} {} reported {}: {}",
                self.asset_id,
                self.version,
                finding.scanner,
                finding.category,
                finding.description
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::digest;

    fn finding(severity: Severity) -> ScanFinding {
        ScanFinding::new("scanner", severity, "category", "description")
    }

    fn valid() -> SignatureVerdict {
        SignatureVerdict::Valid {
            key_fingerprint: "k".to_string(),
        }
    }

    #[test]
    fn test_clean_signed_artifact_is_admitted() {
        let config = VerificationConfig::default();
        let (decision, reasons) = decide(
            &IntegrityVerdict::Verified,
            Some(&valid()),
            &[finding(Severity::Low), finding(Severity::Info)],
            &config,
        );
        assert_eq!(decision, AdmissionDecision::Admit);
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_severity_drives_decision() {
        let config = VerificationConfig::default();
        for (severity, expected) in [
            (Severity::Medium, AdmissionDecision::AdmitWithWarnings),
            (Severity::High, AdmissionDecision::AdmitWithWarnings),
            (Severity::Critical, AdmissionDecision::Reject),
        ] {
            let (decision, _) =
                decide(&IntegrityVerdict::Verified, Some(&valid()), &[finding(severity)], &config);
            assert_eq!(decision, expected, "severity {severity}");
        }
    }

    #[test]
    fn test_integrity_failures_reject() {
        let config = VerificationConfig::default();
        let mismatch = IntegrityVerdict::Mismatch {
            expected: digest(b"a"),
            actual: digest(b"b"),
        };
        assert_eq!(decide(&mismatch, None, &[], &config).0, AdmissionDecision::Reject);

        let unavailable = IntegrityVerdict::Unavailable {
            reason: "down".to_string(),
        };
        assert_eq!(decide(&unavailable, None, &[], &config).0, AdmissionDecision::Reject);
    }

    #[test]
    fn test_signature_policies() {
        let permissive = VerificationConfig {
            unsigned_policy: UnsignedPolicy::Permissive,
            unknown_key_policy: UnsignedPolicy::Permissive,
            ..Default::default()
        };
        let strict = VerificationConfig {
            unsigned_policy: UnsignedPolicy::Strict,
            unknown_key_policy: UnsignedPolicy::Strict,
            ..Default::default()
        };
        let unknown = SignatureVerdict::KeyUnknown {
            key_fingerprint: "k".to_string(),
        };

        for (verdict, config, expected) in [
            (&SignatureVerdict::Unsigned, &permissive, AdmissionDecision::AdmitWithWarnings),
            (&SignatureVerdict::Unsigned, &strict, AdmissionDecision::Reject),
            (&unknown, &permissive, AdmissionDecision::AdmitWithWarnings),
            (&unknown, &strict, AdmissionDecision::Reject),
        ] {
            let (decision, _) = decide(&IntegrityVerdict::Verified, Some(verdict), &[], config);
            assert_eq!(decision, expected, "{verdict:?}");
        }

        // Invalid and revoked signatures reject no matter the policy
        let invalid = SignatureVerdict::Invalid {
            key_fingerprint: "k".to_string(),
            reason: "bad".to_string(),
        };
        let revoked = SignatureVerdict::Revoked {
            key_fingerprint: "k".to_string(),
            revoked_at: Utc::now(),
        };
        for verdict in [&invalid, &revoked] {
            let (decision, _) =
                decide(&IntegrityVerdict::Verified, Some(verdict), &[], &permissive);
            assert_eq!(decision, AdmissionDecision::Reject);
        }
    }

    #[test]
    fn test_seal_orders_findings_and_records_reasons() {
        let record = TrustRecord::seal(
            AssetId::new("lib"),
            VersionSpec::new(1, 0, 0),
            digest(b"lib"),
            IntegrityVerdict::Verified,
            Some(SignatureVerdict::Unsigned),
            vec![
                ScanFinding::new("b", Severity::Low, "style", "x"),
                ScanFinding::new("a", Severity::High, "secrets", "y"),
                ScanFinding::new("a", Severity::Info, "note", "z"),
            ],
            &VerificationConfig::default(),
        );

        let severities: Vec<Severity> = record.findings().iter().map(|f| f.severity).collect();
        assert_eq!(severities, vec![Severity::High, Severity::Low, Severity::Info]);
        assert_eq!(record.max_severity(), Some(Severity::High));
        assert_eq!(record.decision(), AdmissionDecision::AdmitWithWarnings);
        assert_eq!(
            record.reasons(),
            &[
                "artifact is unsigned".to_string(),
                "high finding from a: secrets".to_string()
            ]
        );
    }

    #[test]
    fn test_signature_error_maps_to_verdict() {
        let verdict: SignatureVerdict = SignatureError::UnknownKey {
            fingerprint: "sha256:abc".to_string(),
        }
        .into();
        assert_eq!(
            verdict,
            SignatureVerdict::KeyUnknown {
                key_fingerprint: "sha256:abc".to_string()
            }
        );
    }
}
