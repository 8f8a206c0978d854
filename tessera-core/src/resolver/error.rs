//! Resolution error types carrying enough context for diagnostics

use super::graph::{AssetId, SourcedRequirement};
use super::provider::MetadataError;
use thiserror::Error;

/// Resolution failures; a session never partially succeeds
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// No available version satisfies the accumulated requirements
    #[error("No version of {asset_id} satisfies all requirements: {}", list_requirements(.requirements))]
    Conflict {
        asset_id: AssetId,
        requirements: Vec<SourcedRequirement>,
    },

    /// The dependency graph loops back on itself
    #[error("Dependency cycle detected: {}", render_cycle(.path))]
    Cycle { path: Vec<AssetId> },

    /// The graph is deeper than the configured limit
    #[error("Dependency depth limit of {max_depth} exceeded at {asset_id}")]
    DepthExceeded { asset_id: AssetId, max_depth: usize },

    /// The metadata provider failed for an asset
    #[error("Metadata lookup failed for {asset_id}")]
    Provider {
        asset_id: AssetId,
        #[source]
        source: MetadataError,
    },

    /// The session's cancellation signal fired
    #[error("Resolution cancelled")]
    Cancelled,
}

fn list_requirements(requirements: &[SourcedRequirement]) -> String {
    requirements
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn render_cycle(path: &[AssetId]) -> String {
    let mut rendered: Vec<&str> = path.iter().map(AssetId::as_str).collect();
    if let Some(first) = path.first() {
        rendered.push(first.as_str());
    }
    rendered.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::graph::RequirementSource;
    use crate::version::VersionRequirement;

    #[test]
    fn test_conflict_message_lists_every_requirement() {
        let err = ResolutionError::Conflict {
            asset_id: AssetId::new("lib"),
            requirements: vec![
                SourcedRequirement {
                    source: RequirementSource::Root,
                    requirement: VersionRequirement::parse(">=2.0.0").unwrap(),
                    optional: false,
                },
                SourcedRequirement {
                    source: RequirementSource::Dependent(AssetId::new("app")),
                    requirement: VersionRequirement::parse("<1.5.0").unwrap(),
                    optional: false,
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "No version of lib satisfies all requirements: >=2.0.0 (from root); <1.5.0 (from app)"
        );
    }

    #[test]
    fn test_cycle_message_closes_the_loop() {
        let err = ResolutionError::Cycle {
            path: vec![AssetId::new("x"), AssetId::new("y")],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: x -> y -> x");
    }
}
