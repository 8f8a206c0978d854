//! Signature verification over canonical artifact metadata
//!
//! The signed payload is a fixed, ordered, length-prefixed concatenation of
//! (asset id, version string, content digest, size in bytes) behind a
//! protocol tag. Changing the field order or set requires a new
//! [`CANONICAL_PAYLOAD_VERSION`].

use super::digest::{digest, Digest};
use crate::version::VersionSpec;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Version of the canonical payload layout
pub const CANONICAL_PAYLOAD_VERSION: u32 = 1;

const PAYLOAD_TAG: &[u8] = b"tessera-signed-artifact/v1";

/// Signature verification failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signing key {fingerprint} is not in the trust-anchor store")]
    UnknownKey { fingerprint: String },

    #[error("Signing key {fingerprint} was revoked at {revoked_at}")]
    Revoked {
        fingerprint: String,
        revoked_at: DateTime<Utc>,
    },

    #[error("Signature verification failed for key {fingerprint}: {reason}")]
    Invalid { fingerprint: String, reason: String },
}

impl SignatureError {
    /// Log signature failures that indicate tampering or a compromised key
    pub fn log_if_security_critical(&self) {
        match self {
            SignatureError::Invalid { .. } | SignatureError::Revoked { .. } => {
                tracing::error!(target: "security", "SIGNATURE VIOLATION: {}", self);
            }
            SignatureError::UnknownKey { .. } => {}
        }
    }
}

/// Public-key algorithms accepted for artifact signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Ed25519,
}

/// A trust anchor as supplied by the external key store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub algorithm: KeyAlgorithm,
    /// Raw public key bytes
    #[serde(with = "hex_bytes")]
    pub key: Vec<u8>,
    /// `sha256:<hex>` of the raw key bytes
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl PublicKeyRecord {
    /// Build a record for a raw Ed25519 public key
    pub fn ed25519(key: [u8; 32]) -> Self {
        Self {
            algorithm: KeyAlgorithm::Ed25519,
            fingerprint: Self::fingerprint_of(&key),
            key: key.to_vec(),
            revoked_at: None,
        }
    }

    /// Fingerprint convention for raw key bytes
    pub fn fingerprint_of(key: &[u8]) -> String {
        digest(key).to_string()
    }

    pub fn revoked(mut self, at: DateTime<Utc>) -> Self {
        self.revoked_at = Some(at);
        self
    }
}

/// A detached signature declared for one artifact version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSignature {
    pub key_fingerprint: String,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// Read-only source of trusted public keys
pub trait TrustAnchorStore: Send + Sync {
    fn lookup_key(&self, fingerprint: &str) -> Option<PublicKeyRecord>;
}

/// Trust-anchor store backed by a map, for embedding hosts and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryTrustAnchors {
    keys: BTreeMap<String, PublicKeyRecord>,
}

impl InMemoryTrustAnchors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: PublicKeyRecord) {
        self.keys.insert(record.fingerprint.clone(), record);
    }

    pub fn with_key(mut self, record: PublicKeyRecord) -> Self {
        self.insert(record);
        self
    }
}

impl TrustAnchorStore for InMemoryTrustAnchors {
    fn lookup_key(&self, fingerprint: &str) -> Option<PublicKeyRecord> {
        self.keys.get(fingerprint).cloned()
    }
}

/// Build the canonical signed payload for an artifact
pub fn canonical_payload(
    asset_id: &str,
    version: &VersionSpec,
    digest: &Digest,
    size: u64,
) -> Vec<u8> {
    let fields = [
        asset_id.to_string(),
        version.to_string(),
        digest.to_string(),
        size.to_string(),
    ];

    let capacity = PAYLOAD_TAG.len() + fields.iter().map(|f| f.len() + 8).sum::<usize>();
    let mut payload = Vec::with_capacity(capacity);
    payload.extend_from_slice(PAYLOAD_TAG);
    for field in &fields {
        payload.extend_from_slice(&(field.len() as u64).to_be_bytes());
        payload.extend_from_slice(field.as_bytes());
    }
    payload
}

/// Verifies signatures against an injected trust-anchor store
pub struct SignatureVerifier<'a> {
    anchors: &'a dyn TrustAnchorStore,
    now: DateTime<Utc>,
}

impl<'a> SignatureVerifier<'a> {
    pub fn new(anchors: &'a dyn TrustAnchorStore, now: DateTime<Utc>) -> Self {
        Self { anchors, now }
    }

    /// Verify `signature` over `payload` with `key`
    ///
    /// The key must be present in the anchor store under its fingerprint with
    /// identical key material, and the store's revocation timestamp is
    /// authoritative.
    pub fn verify_signature(
        &self,
        payload: &[u8],
        signature: &[u8],
        key: &PublicKeyRecord,
    ) -> Result<(), SignatureError> {
        let fingerprint = key.fingerprint.clone();

        let anchored = match self.anchors.lookup_key(&key.fingerprint) {
            Some(anchored) if anchored.key == key.key && anchored.algorithm == key.algorithm => {
                anchored
            }
            _ => return Err(SignatureError::UnknownKey { fingerprint }),
        };

        if let Some(revoked_at) = anchored.revoked_at {
            if revoked_at <= self.now {
                return Err(SignatureError::Revoked {
                    fingerprint,
                    revoked_at,
                });
            }
        }

        let invalid = |reason: String| SignatureError::Invalid {
            fingerprint: fingerprint.clone(),
            reason,
        };

        match anchored.algorithm {
            KeyAlgorithm::Ed25519 => {
                let key_bytes: [u8; 32] = anchored
                    .key
                    .as_slice()
                    .try_into()
                    .map_err(|_| invalid("ed25519 public key must be 32 bytes".to_string()))?;
                let verifying_key = VerifyingKey::from_bytes(&key_bytes)
                    .map_err(|e| invalid(format!("malformed public key: {e}")))?;
                let signature = Signature::from_slice(signature)
                    .map_err(|e| invalid(format!("malformed signature: {e}")))?;
                verifying_key
                    .verify_strict(payload, &signature)
                    .map_err(|e| invalid(e.to_string()))?;
            }
        }

        debug!("Signature verified with key {}", key.fingerprint);
        Ok(())
    }

    /// Look up the declared key and verify an artifact's canonical payload
    pub fn verify_artifact(
        &self,
        asset_id: &str,
        version: &VersionSpec,
        digest: &Digest,
        size: u64,
        declared: &ArtifactSignature,
    ) -> Result<(), SignatureError> {
        let key = self
            .anchors
            .lookup_key(&declared.key_fingerprint)
            .ok_or_else(|| SignatureError::UnknownKey {
                fingerprint: declared.key_fingerprint.clone(),
            })?;

        let payload = canonical_payload(asset_id, version, digest, size);
        self.verify_signature(&payload, &declared.signature, &key)
    }
}

/// Hex (de)serialization for raw byte fields
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}
