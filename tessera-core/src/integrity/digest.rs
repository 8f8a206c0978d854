//! Content digests
//!
//! Every digest carries its algorithm tag in its text form
//! (`sha256:<hex>`) so stored digests stay meaningful across a future
//! algorithm migration.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Hash algorithms understood by the integrity layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    Sha256,
}

impl DigestAlgorithm {
    /// Algorithm used for every newly computed digest
    pub const CURRENT: DigestAlgorithm = DigestAlgorithm::Sha256;

    pub fn tag(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "sha256" => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// Errors raised while parsing a digest string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestParseError {
    #[error("Digest '{0}' is missing its algorithm tag (expected '<algorithm>:<hex>')")]
    MissingAlgorithm(String),

    #[error("Unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("Digest body for {algorithm} must be {expected} lowercase hex characters")]
    MalformedHex {
        algorithm: &'static str,
        expected: usize,
    },
}

/// An algorithm-tagged content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Lowercase hex body without the algorithm tag
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Parse `<algorithm>:<hex>`
    pub fn parse(input: &str) -> Result<Self, DigestParseError> {
        let (tag, body) = input
            .split_once(':')
            .ok_or_else(|| DigestParseError::MissingAlgorithm(input.to_string()))?;

        let algorithm = DigestAlgorithm::from_tag(tag)
            .ok_or_else(|| DigestParseError::UnsupportedAlgorithm(tag.to_string()))?;

        let well_formed = body.len() == algorithm.hex_len()
            && body
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !well_formed {
            return Err(DigestParseError::MalformedHex {
                algorithm: algorithm.tag(),
                expected: algorithm.hex_len(),
            });
        }

        Ok(Self {
            algorithm,
            hex: body.to_string(),
        })
    }
}

/// Hash bytes with the current algorithm
pub fn digest(bytes: &[u8]) -> Digest {
    digest_with(DigestAlgorithm::CURRENT, bytes)
}

/// Hash bytes with a specific algorithm
pub fn digest_with(algorithm: DigestAlgorithm, bytes: &[u8]) -> Digest {
    let hex = match algorithm {
        DigestAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        }
    };

    Digest { algorithm, hex }
}

/// Check bytes against an expected digest
///
/// The bytes are hashed with the expected digest's own algorithm, so
/// historic digests keep verifying after the current algorithm changes.
pub fn verify_digest(bytes: &[u8], expected: &Digest) -> bool {
    digest_with(expected.algorithm, bytes) == *expected
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.tag(), self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
