//! Engine configuration
//!
//! All settings have defaults, so an empty document is a valid config:
//!
//! ```yaml
//! resolver:
//!   max_depth: 64
//! verification:
//!   workers: 16                  # default: logical cores x 4
//!   scanner_timeout_seconds: 30
//!   cancellation_grace_millis: 2000
//!   cache_ttl_seconds: 900
//!   unsigned_policy: permissive  # or strict
//!   unknown_key_policy: strict
//! scanners:
//!   - name: secrets
//!     command: ./scanners/secrets.sh
//!     timeout_seconds: 10        # overrides scanner_timeout_seconds
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    /// External-process scanners to register at startup
    #[serde(default)]
    pub scanners: Vec<CommandScannerConfig>,
}

/// Dependency resolver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Deepest allowed distance from a root
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// What to do with an artifact whose signature cannot be checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsignedPolicy {
    /// Admit with warnings
    Permissive,
    /// Reject
    Strict,
}

/// Trust verification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Nodes verified concurrently; `None` means logical cores x 4
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    #[serde(default = "default_scanner_timeout")]
    pub scanner_timeout_seconds: u64,

    /// How long in-flight work may run after cancellation before it is abandoned
    #[serde(default = "default_cancellation_grace")]
    pub cancellation_grace_millis: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Applies to artifacts that carry no signature
    #[serde(default = "default_unsigned_policy")]
    pub unsigned_policy: UnsignedPolicy,

    /// Applies to signatures made with a key the trust anchors do not know
    #[serde(default = "default_unknown_key_policy")]
    pub unknown_key_policy: UnsignedPolicy,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            workers: None,
            scanner_timeout_seconds: default_scanner_timeout(),
            cancellation_grace_millis: default_cancellation_grace(),
            cache_ttl_seconds: default_cache_ttl(),
            unsigned_policy: default_unsigned_policy(),
            unknown_key_policy: default_unknown_key_policy(),
        }
    }
}

impl VerificationConfig {
    /// Effective worker pool size
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                * 4
        })
    }

    pub fn scanner_timeout(&self) -> Duration {
        Duration::from_secs(self.scanner_timeout_seconds)
    }

    pub fn cancellation_grace(&self) -> Duration {
        Duration::from_millis(self.cancellation_grace_millis)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// An external command registered as a scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandScannerConfig {
    /// Registry name; must be unique
    pub name: String,

    /// Shell command receiving artifact bytes on stdin
    pub command: String,

    /// Reported scanner version
    #[serde(default = "default_scanner_version")]
    pub version: String,

    /// Per-scanner override of `scanner_timeout_seconds`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_max_depth() -> usize {
    64
}

fn default_scanner_timeout() -> u64 {
    30
}

fn default_cancellation_grace() -> u64 {
    2000
}

fn default_cache_ttl() -> u64 {
    15 * 60
}

fn default_unsigned_policy() -> UnsignedPolicy {
    UnsignedPolicy::Permissive
}

fn default_unknown_key_policy() -> UnsignedPolicy {
    UnsignedPolicy::Strict
}

fn default_scanner_version() -> String {
    "unversioned".to_string()
}

impl EngineConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml_ng::from_str(content).context("Failed to parse engine config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid engine config: {}", path.display()))
    }

    /// Reject settings that would make the engine unusable
    pub fn validate(&self) -> Result<()> {
        if self.resolver.max_depth == 0 {
            anyhow::bail!("resolver.max_depth must be at least 1");
        }
        if self.verification.workers == Some(0) {
            anyhow::bail!("verification.workers must be at least 1");
        }
        if self.verification.scanner_timeout_seconds == 0 {
            anyhow::bail!("verification.scanner_timeout_seconds must be at least 1");
        }

        let mut seen = BTreeSet::new();
        for scanner in &self.scanners {
            if scanner.name.trim().is_empty() {
                anyhow::bail!("Scanner names must not be empty");
            }
            if !seen.insert(scanner.name.as_str()) {
                anyhow::bail!("Duplicate scanner name '{}'", scanner.name);
            }
            if scanner.command.trim().is_empty() {
                anyhow::bail!("Scanner '{}' has an empty command", scanner.name);
            }
            if scanner.timeout_seconds == Some(0) {
                anyhow::bail!("Scanner '{}' timeout_seconds must be at least 1", scanner.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.resolver.max_depth, 64);
        assert_eq!(config.verification.scanner_timeout(), Duration::from_secs(30));
        assert_eq!(config.verification.cache_ttl(), Duration::from_secs(900));
        assert_eq!(config.verification.unsigned_policy, UnsignedPolicy::Permissive);
        assert_eq!(config.verification.unknown_key_policy, UnsignedPolicy::Strict);
        assert!(config.scanners.is_empty());
    }

    #[test]
    fn test_worker_count_defaults_to_four_per_core() {
        let config = VerificationConfig::default();
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(config.worker_count(), cores * 4);

        let pinned = VerificationConfig {
            workers: Some(3),
            ..Default::default()
        };
        assert_eq!(pinned.worker_count(), 3);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
resolver:
  max_depth: 8
verification:
  workers: 2
  scanner_timeout_seconds: 5
  unsigned_policy: strict
scanners:
  - name: secrets
    command: ./secrets.sh
    timeout_seconds: 1
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.resolver.max_depth, 8);
        assert_eq!(config.verification.worker_count(), 2);
        assert_eq!(config.verification.unsigned_policy, UnsignedPolicy::Strict);
        assert_eq!(config.verification.cancellation_grace_millis, 2000);
        assert_eq!(config.scanners.len(), 1);
        assert_eq!(config.scanners[0].version, "unversioned");
        assert_eq!(config.scanners[0].timeout_seconds, Some(1));
    }

    #[test]
    fn test_validation_failures() {
        for yaml in [
            "resolver: { max_depth: 0 }",
            "verification: { workers: 0 }",
            "verification: { scanner_timeout_seconds: 0 }",
            "scanners: [{ name: a, command: x }, { name: a, command: y }]",
            "scanners: [{ name: a, command: '  ' }]",
            "scanners: [{ name: '', command: x }]",
        ] {
            assert!(EngineConfig::from_yaml(yaml).is_err(), "accepted: {yaml}");
        }
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(EngineConfig::from_yaml("verification: { unsigned_policy: maybe }").is_err());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "resolver:\n  max_depth: 3").unwrap();

        let config = EngineConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.resolver.max_depth, 3);

        let missing = file.path().with_extension("missing");
        let err = EngineConfig::load_from_path(&missing).unwrap_err();
        assert!(err.to_string().contains("Failed to read engine config"));
    }
}
