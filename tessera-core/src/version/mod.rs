//! Semantic version model
//!
//! Parsing is delegated to the `semver` crate so the accepted grammar is
//! exactly `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`. Ordering follows SemVer
//! precedence over (major, minor, patch, pre-release). Build metadata is kept
//! for display and for the signed payload, but it never takes part in
//! ordering, equality or hashing.

mod requirement;

pub use requirement::VersionRequirement;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing versions and requirements
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input is not `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`
    #[error("Malformed version '{input}': {reason}")]
    Malformed { input: String, reason: String },

    /// Input is not a recognised requirement expression
    #[error("Invalid version requirement '{input}': {reason}")]
    InvalidRequirement { input: String, reason: String },
}

/// An immutable semantic version
#[derive(Debug, Clone)]
pub struct VersionSpec {
    major: u64,
    minor: u64,
    patch: u64,
    pre: semver::Prerelease,
    build: semver::BuildMetadata,
}

impl VersionSpec {
    /// Create a release version with no pre-release label or build metadata
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: semver::Prerelease::EMPTY,
            build: semver::BuildMetadata::EMPTY,
        }
    }

    /// Parse a version string
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let parsed = semver::Version::parse(input).map_err(|e| ParseError::Malformed {
            input: input.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            pre: parsed.pre,
            build: parsed.build,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// Pre-release label, if any (e.g. `rc.1`)
    pub fn pre_release(&self) -> Option<&str> {
        (!self.pre.is_empty()).then(|| self.pre.as_str())
    }

    /// Build metadata, if any (e.g. `sha.5114f85`)
    pub fn build_metadata(&self) -> Option<&str> {
        (!self.build.is_empty()).then(|| self.build.as_str())
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }
}

/// Compare two versions by SemVer precedence, ignoring build metadata
pub fn compare(a: &VersionSpec, b: &VersionSpec) -> Ordering {
    a.major
        .cmp(&b.major)
        .then_with(|| a.minor.cmp(&b.minor))
        .then_with(|| a.patch.cmp(&b.patch))
        // semver::Prerelease orders the empty label above any non-empty one
        .then_with(|| a.pre.cmp(&b.pre))
}

impl Ord for VersionSpec {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for VersionSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionSpec {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == Ordering::Equal
    }
}

impl Eq for VersionSpec {}

impl Hash for VersionSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.pre.as_str().hash(state);
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}

impl FromStr for VersionSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
