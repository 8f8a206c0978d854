//! End-to-end tests: resolve a graph, then verify and admit it

mod common;

use common::{init_test_logging, requirement, signed_catalog, trust_anchors, version};
use tessera_core::resolver::{AssetId, GraphLock, Resolver};
use tessera_core::trust::{IntegrityVerdict, ScannerRegistry, SignatureVerdict};
use tessera_core::{AdmissionDecision, EngineConfig, TrustOrchestrator};

fn id(s: &str) -> AssetId {
    AssetId::new(s)
}

#[tokio::test]
async fn test_signed_catalog_is_admitted() {
    init_test_logging();

    let registry = signed_catalog();
    let config = EngineConfig::default();
    let resolver = Resolver::new(registry.clone(), config.resolver.clone());
    let graph = resolver.resolve(&[(id("web"), requirement("^2.0"))]).await.unwrap();

    let selected: Vec<(&str, String)> = graph
        .nodes()
        .map(|n| (n.asset_id.as_str(), n.version.to_string()))
        .collect();
    assert_eq!(
        selected,
        vec![
            ("http", "1.6.0".to_string()),
            ("json", "3.2.0".to_string()),
            ("tls", "0.8.3".to_string()),
            ("web", "2.1.0".to_string()),
        ]
    );
    let web = graph.node(&id("web")).unwrap();
    assert_eq!(web.resolution.advisories.len(), 1);
    assert_eq!(web.resolution.advisories[0].dependency, id("telemetry"));

    let orchestrator =
        TrustOrchestrator::new(registry, ScannerRegistry::new(), config.verification.clone());
    let report = orchestrator.admit(&graph, &trust_anchors()).await;

    assert_eq!(report.decision, AdmissionDecision::Admit);
    for record in report.records.values() {
        assert_eq!(record.integrity(), &IntegrityVerdict::Verified);
        assert!(matches!(record.signature(), Some(SignatureVerdict::Valid { .. })));
    }
}

#[tokio::test]
async fn test_tampered_dependency_rejects_the_graph() {
    init_test_logging();

    let registry = signed_catalog();
    let graph = Resolver::new(registry.clone(), Default::default())
        .resolve(&[(id("web"), requirement("^2.0"))])
        .await
        .unwrap();
    registry.tamper(&id("tls"), &version("0.8.3"), b"backdoored".to_vec());

    let orchestrator = TrustOrchestrator::new(registry, ScannerRegistry::new(), Default::default());
    let report = orchestrator.admit(&graph, &trust_anchors()).await;

    assert_eq!(report.decision, AdmissionDecision::Reject);
    let flagged: Vec<&str> = report.flagged().iter().map(|r| r.asset_id().as_str()).collect();
    assert_eq!(flagged, vec!["tls"]);
    assert!(matches!(
        report.records[&id("tls")].integrity(),
        IntegrityVerdict::Mismatch { .. }
    ));
}

#[tokio::test]
async fn test_lock_file_pins_resolution() {
    init_test_logging();

    let registry = signed_catalog();
    let resolver = Resolver::new(registry.clone(), Default::default());
    let roots = [(id("web"), requirement("^2.0"))];
    let graph = resolver.resolve(&roots).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tessera.lock.yaml");
    GraphLock::from_graph(&graph).save_to_path(&path).unwrap();

    let lock = GraphLock::load_from_path(&path).unwrap();
    assert!(lock.drift(&resolver.resolve(&roots).await.unwrap()).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_configured_command_scanner_flags_content() {
    init_test_logging();

    let yaml = r#"
verification:
  workers: 2
  scanner_timeout_seconds: 10
scanners:
  - name: license-check
    version: 1.2.0
    command: >-
      if grep -q 'contents of json'; then
      echo '[{"severity":"medium","category":"license","description":"copyleft license"}]';
      fi
"#;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tessera.yaml");
    std::fs::write(&path, yaml).unwrap();
    let config = EngineConfig::load_from_path(&path).unwrap();

    let registry = signed_catalog();
    let graph = Resolver::new(registry.clone(), config.resolver.clone())
        .resolve(&[(id("web"), requirement("^2.0"))])
        .await
        .unwrap();

    let orchestrator = TrustOrchestrator::from_config(registry, &config).unwrap();
    let report = orchestrator.admit(&graph, &trust_anchors()).await;

    assert_eq!(report.decision, AdmissionDecision::AdmitWithWarnings);
    let json = &report.records[&id("json")];
    assert_eq!(json.decision(), AdmissionDecision::AdmitWithWarnings);
    assert_eq!(json.findings()[0].scanner, "license-check");
    assert_eq!(json.findings()[0].category, "license");
    assert_eq!(report.records[&id("http")].decision(), AdmissionDecision::Admit);
}

#[tokio::test]
async fn test_shared_cache_across_graphs() {
    init_test_logging();

    let registry = signed_catalog();
    let resolver = Resolver::new(registry.clone(), Default::default());
    let web = resolver.resolve(&[(id("web"), requirement("^2.0"))]).await.unwrap();
    let http = resolver.resolve(&[(id("http"), requirement("^1.4"))]).await.unwrap();

    let orchestrator =
        TrustOrchestrator::new(registry.clone(), ScannerRegistry::new(), Default::default());
    let anchors = trust_anchors();
    orchestrator.verify(&web, &anchors).await;
    let fetched = registry.fetch_count();
    assert_eq!(fetched, 4);

    // http and tls are already cached from the first graph
    let records = orchestrator.verify(&http, &anchors).await;
    assert_eq!(records.len(), 2);
    assert_eq!(registry.fetch_count(), fetched);
}
