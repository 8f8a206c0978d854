//! Resolver and verification benchmarks over a synthetic layered catalog

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tessera_core::integrity::InMemoryTrustAnchors;
use tessera_core::registry::InMemoryRegistry;
use tessera_core::resolver::{AssetId, DependencyDecl, Resolver};
use tessera_core::trust::ScannerRegistry;
use tessera_core::{TrustOrchestrator, VersionRequirement, VersionSpec};

/// `layers` layers of `width` assets; each asset depends on every asset of
/// the next layer and publishes five patch versions
fn layered_catalog(layers: usize, width: usize) -> Arc<InMemoryRegistry> {
    let registry = InMemoryRegistry::new();
    let caret = VersionRequirement::parse("^1.0").unwrap();

    for layer in 0..layers {
        for slot in 0..width {
            let deps: Vec<DependencyDecl> = if layer + 1 < layers {
                (0..width)
                    .map(|next| {
                        DependencyDecl::required(format!("l{}-{next}", layer + 1), caret.clone())
                    })
                    .collect()
            } else {
                Vec::new()
            };

            for patch in 0..5 {
                registry.publish(
                    format!("l{layer}-{slot}"),
                    VersionSpec::new(1, 0, patch),
                    format!("l{layer}-{slot}@1.0.{patch}").into_bytes(),
                    deps.clone(),
                );
            }
        }
    }

    Arc::new(registry)
}

fn benchmark_resolution(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let registry = layered_catalog(6, 10);
    let resolver = Resolver::new(registry, Default::default());
    let roots: Vec<(AssetId, VersionRequirement)> = (0..10)
        .map(|slot| (AssetId::new(format!("l0-{slot}")), VersionRequirement::Wildcard))
        .collect();

    c.bench_function("resolve_60_nodes", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let graph = resolver.resolve(black_box(&roots)).await.unwrap();
                assert_eq!(graph.len(), 60);
            });
        });
    });
}

fn benchmark_verification(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let registry = layered_catalog(6, 10);
    let graph = runtime
        .block_on(
            Resolver::new(registry.clone(), Default::default())
                .resolve(&[(AssetId::new("l0-0"), VersionRequirement::Wildcard)]),
        )
        .unwrap();
    let anchors = InMemoryTrustAnchors::new();

    c.bench_function("verify_uncached", |b| {
        b.iter(|| {
            runtime.block_on(async {
                // Fresh orchestrator so every iteration misses the cache
                let orchestrator = TrustOrchestrator::new(
                    registry.clone(),
                    ScannerRegistry::new(),
                    Default::default(),
                );
                let records = orchestrator.verify(black_box(&graph), &anchors).await;
                assert_eq!(records.len(), graph.len());
            });
        });
    });
}

criterion_group!(benches, benchmark_resolution, benchmark_verification);
criterion_main!(benches);
