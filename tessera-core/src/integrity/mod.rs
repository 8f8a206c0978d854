//! Content Integrity Layer
//!
//! Digest computation over artifact bytes and signature verification over
//! canonicalized artifact metadata.

pub mod digest;
pub mod signature;

pub use digest::{digest, digest_with, verify_digest, Digest, DigestAlgorithm, DigestParseError};
pub use signature::{
    canonical_payload, ArtifactSignature, InMemoryTrustAnchors, KeyAlgorithm, PublicKeyRecord,
    SignatureError, SignatureVerifier, TrustAnchorStore, CANONICAL_PAYLOAD_VERSION,
};
