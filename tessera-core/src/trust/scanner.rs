//! Scanner plugin contract and registry

use super::record::ScanFinding;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A scanner failed to produce findings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Scanner could not run: {0}")]
    Failed(String),

    #[error("Scanner exited with status {code}: {stderr}")]
    Exited { code: i32, stderr: String },

    #[error("Scanner produced unreadable output: {0}")]
    InvalidOutput(String),
}

/// A security scanner run against artifact bytes
///
/// The orchestrator stamps every returned finding with the scanner's
/// registered name.
#[async_trait]
pub trait Scanner: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Per-scanner time limit; `None` uses the configured default
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn scan(&self, bytes: &[u8]) -> Result<Vec<ScanFinding>, ScanError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("A scanner named '{0}' is already registered")]
    Duplicate(String),
}

/// Name-keyed set of scanners, iterated in name order
#[derive(Default, Clone)]
pub struct ScannerRegistry {
    scanners: BTreeMap<String, Arc<dyn Scanner>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scanner: Arc<dyn Scanner>) -> Result<(), RegistrationError> {
        let name = scanner.name().to_string();
        if self.scanners.contains_key(&name) {
            return Err(RegistrationError::Duplicate(name));
        }
        tracing::debug!("Registered scanner {} {}", name, scanner.version());
        self.scanners.insert(name, scanner);
        Ok(())
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn Scanner>) -> Result<Self, RegistrationError> {
        self.register(scanner)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Scanner>> {
        self.scanners.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scanners.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Scanner>> {
        self.scanners.values()
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

impl std::fmt::Debug for ScannerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.scanners.keys()).finish()
    }
}
