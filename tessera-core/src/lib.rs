//! Tessera dependency resolution and trust verification engine

pub mod config;
pub mod integrity;
pub mod logging;
pub mod registry;
pub mod resolver;
pub mod trust;
pub mod version;

pub use config::EngineConfig;
pub use resolver::{DependencyGraph, ResolutionError, Resolver};
pub use trust::{AdmissionDecision, AdmissionReport, TrustOrchestrator, TrustRecord};
pub use version::{VersionRequirement, VersionSpec};
