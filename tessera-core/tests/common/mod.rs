//! Shared fixtures for integration tests

use ed25519_dalek::SigningKey;
use std::sync::{Arc, Once};
use tessera_core::integrity::{InMemoryTrustAnchors, PublicKeyRecord};
use tessera_core::registry::InMemoryRegistry;
use tessera_core::resolver::DependencyDecl;
use tessera_core::{VersionRequirement, VersionSpec};

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn version(s: &str) -> VersionSpec {
    VersionSpec::parse(s).unwrap()
}

pub fn requirement(s: &str) -> VersionRequirement {
    VersionRequirement::parse(s).unwrap()
}

pub fn publisher_key() -> SigningKey {
    SigningKey::from_bytes(&[42; 32])
}

pub fn trust_anchors() -> InMemoryTrustAnchors {
    InMemoryTrustAnchors::new().with_key(PublicKeyRecord::ed25519(
        publisher_key().verifying_key().to_bytes(),
    ))
}

/// A small signed catalog:
///
/// ```text
/// web 2.1.0 -> http ^1.4, json ^3.0, telemetry ^0.9 (optional)
/// http 1.4.2, 1.6.0, 2.0.0 -> tls ~0.8
/// json 3.0.1, 3.2.0
/// tls 0.8.3, 0.9.0
/// ```
///
/// `telemetry` is never published.
pub fn signed_catalog() -> Arc<InMemoryRegistry> {
    let registry = InMemoryRegistry::new();
    let key = publisher_key();
    let publish = |asset: &str, v: &str, deps: Vec<DependencyDecl>| {
        registry.publish_signed(
            asset,
            version(v),
            format!("contents of {asset} {v}").into_bytes(),
            deps,
            &key,
        );
    };

    publish(
        "web",
        "2.1.0",
        vec![
            DependencyDecl::required("http", requirement("^1.4")),
            DependencyDecl::required("json", requirement("^3.0")),
            DependencyDecl::optional("telemetry", requirement("^0.9")),
        ],
    );
    for v in ["1.4.2", "1.6.0", "2.0.0"] {
        publish("http", v, vec![DependencyDecl::required("tls", requirement("~0.8"))]);
    }
    for v in ["3.0.1", "3.2.0"] {
        publish("json", v, Vec::new());
    }
    for v in ["0.8.3", "0.9.0"] {
        publish("tls", v, Vec::new());
    }

    Arc::new(registry)
}
