//! End-to-end build engine runs against real caches and in-memory registries

use crate::common::{sample_wheel, write_project, CountingBuilder};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wheelsmith::build::{
    ArtifactOrigin, BuildEngine, BuildOptions, BuildRequest, ProjectMetadata, ResolvedSource,
};
use wheelsmith::cache::{ArtifactCache, BuildFingerprint, CacheLimits, FingerprintPolicy};
use wheelsmith::error::{WheelsmithError, WheelsmithResult};
use wheelsmith::hash::Digest;
use wheelsmith::registry::{
    ArtifactId, MemoryTransport, RegistryConfig, RegistryRecord, RegistryTransport, WheelRegistry,
};

/// Registry that is never reachable
struct DownTransport;

#[async_trait]
impl RegistryTransport for DownTransport {
    async fn contains(&self, _digest: &Digest) -> WheelsmithResult<bool> {
        Err(WheelsmithError::registry_unavailable("http://down.invalid", "connection refused"))
    }

    async fn upload(&self, _record: &RegistryRecord, _bytes: &[u8]) -> WheelsmithResult<()> {
        Err(WheelsmithError::registry_unavailable("http://down.invalid", "connection refused"))
    }

    async fn resolve(&self, _id: &ArtifactId) -> WheelsmithResult<Option<RegistryRecord>> {
        Err(WheelsmithError::registry_unavailable("http://down.invalid", "connection refused"))
    }

    async fn download(&self, _digest: &Digest, _max: u64) -> WheelsmithResult<Option<Vec<u8>>> {
        Err(WheelsmithError::registry_unavailable("http://down.invalid", "connection refused"))
    }

    fn transport_name(&self) -> &'static str {
        "down"
    }
}

fn registry(transport: Arc<dyn RegistryTransport>) -> WheelRegistry {
    let config = RegistryConfig::new("http://registry.test", "ci").unwrap();
    WheelRegistry::with_transport(config, transport)
}

async fn open_cache(root: &Path) -> Arc<ArtifactCache> {
    Arc::new(ArtifactCache::open(root, CacheLimits::default()).await.unwrap())
}

fn request(project: &Path) -> BuildRequest {
    BuildRequest {
        source: ResolvedSource::new(project),
        project: ProjectMetadata::from_pyproject(project).unwrap(),
        output_dir: project.join("dist"),
    }
}

#[tokio::test]
async fn cache_hit_never_invokes_builder() {
    let dir = TempDir::new().unwrap();
    let project = write_project(dir.path(), "demo", "1.0");
    let cache = open_cache(&dir.path().join("cache")).await;
    let builder = Arc::new(CountingBuilder::new(sample_wheel("demo", "1.0", "v = 1")));
    let engine = BuildEngine::new(cache.clone(), builder.clone(), BuildOptions::default());

    let first = engine.build(&request(&project)).await.unwrap();
    assert_eq!(first.origin, ArtifactOrigin::Built);
    assert_eq!(builder.calls(), 1);

    std::fs::remove_dir_all(project.join("dist")).unwrap();
    let second = engine.build(&request(&project)).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.origin, ArtifactOrigin::LocalCache);
    assert_eq!(builder.calls(), 1);
    assert!(second.artifact_path.is_file());
    assert_eq!(Digest::of_file(&second.artifact_path).unwrap(), first.digest);
}

#[tokio::test]
async fn source_change_misses_cache() {
    let dir = TempDir::new().unwrap();
    let project = write_project(dir.path(), "demo", "1.0");
    let cache = open_cache(&dir.path().join("cache")).await;
    let builder = Arc::new(CountingBuilder::new(sample_wheel("demo", "1.0", "v = 1")));
    let engine = BuildEngine::new(cache.clone(), builder.clone(), BuildOptions::default());

    engine.build(&request(&project)).await.unwrap();
    std::fs::write(project.join("demo/__init__.py"), "VALUE = 2\n").unwrap();
    let again = engine.build(&request(&project)).await.unwrap();

    assert_eq!(again.origin, ArtifactOrigin::Built);
    assert_eq!(builder.calls(), 2);
    // Same bytes produced, so the cache still holds one entry
    assert_eq!(cache.stats().await.entry_count, 1);
}

#[tokio::test]
async fn published_artifact_is_fetched_by_another_machine() {
    let dir = TempDir::new().unwrap();
    let project = write_project(dir.path(), "demo", "1.0");
    let shared = Arc::new(MemoryTransport::new());
    let wheel = sample_wheel("demo", "1.0", "v = 1");

    let publisher_builder = Arc::new(CountingBuilder::new(wheel.clone()));
    let publisher = BuildEngine::new(
        open_cache(&dir.path().join("cache-a")).await,
        publisher_builder.clone(),
        BuildOptions {
            publish: true,
            ..BuildOptions::default()
        },
    )
    .with_registry(registry(shared.clone()));
    let published = publisher.build(&request(&project)).await.unwrap();
    assert_eq!(published.origin, ArtifactOrigin::Built);
    assert_eq!(shared.blob_count(), 1);

    let consumer_builder = Arc::new(CountingBuilder::new(wheel));
    let consumer_cache = open_cache(&dir.path().join("cache-b")).await;
    let consumer = BuildEngine::new(
        consumer_cache.clone(),
        consumer_builder.clone(),
        BuildOptions::default(),
    )
    .with_registry(registry(shared.clone()));
    std::fs::remove_dir_all(project.join("dist")).unwrap();
    let fetched = consumer.build(&request(&project)).await.unwrap();

    assert_eq!(fetched.origin, ArtifactOrigin::Registry);
    assert!(fetched.from_cache);
    assert!(!fetched.degraded);
    assert_eq!(fetched.digest, published.digest);
    assert_eq!(consumer_builder.calls(), 0);
    assert_eq!(consumer_cache.stats().await.entry_count, 1);
}

#[tokio::test]
async fn unreachable_registry_degrades_to_local_build() {
    let dir = TempDir::new().unwrap();
    let project = write_project(dir.path(), "demo", "1.0");
    let builder = Arc::new(CountingBuilder::new(sample_wheel("demo", "1.0", "v = 1")));
    let engine = BuildEngine::new(
        open_cache(&dir.path().join("cache")).await,
        builder.clone(),
        BuildOptions {
            publish: true,
            ..BuildOptions::default()
        },
    )
    .with_registry(registry(Arc::new(DownTransport)));

    let result = engine.build(&request(&project)).await.unwrap();
    assert_eq!(result.origin, ArtifactOrigin::Built);
    assert!(result.degraded);
    assert_eq!(builder.calls(), 1);
}

#[tokio::test]
async fn tampered_registry_artifact_is_rebuilt_locally() {
    let dir = TempDir::new().unwrap();
    let project = write_project(dir.path(), "demo", "1.0");
    let transport = Arc::new(MemoryTransport::new());

    let fingerprint = BuildFingerprint::compute(
        &ProjectMetadata::from_pyproject(&project).unwrap(),
        &ResolvedSource::new(&project),
        "counting",
        &FingerprintPolicy::default(),
    )
    .unwrap();

    let genuine = sample_wheel("demo", "1.0", "v = 1");
    let record = RegistryRecord {
        digest: Digest::of_bytes(&genuine),
        name: "demo".to_string(),
        version: "1.0".to_string(),
        source_spec_hash: fingerprint.to_string(),
        size_bytes: genuine.len() as u64,
        file_name: "demo-1.0-py3-none-any.whl".to_string(),
    };
    transport.insert_raw(record, sample_wheel("demo", "1.0", "import os; os.system('x')"));

    let builder = Arc::new(CountingBuilder::new(genuine.clone()));
    let cache = open_cache(&dir.path().join("cache")).await;
    let engine = BuildEngine::new(cache.clone(), builder.clone(), BuildOptions::default())
        .with_registry(registry(transport));

    let result = engine.build(&request(&project)).await.unwrap();
    assert_eq!(result.origin, ArtifactOrigin::Built);
    assert!(!result.degraded);
    assert_eq!(builder.calls(), 1);
    assert_eq!(result.digest, Digest::of_bytes(&genuine));
    assert_eq!(cache.stats().await.entry_count, 1);
}

#[tokio::test]
async fn every_platform_of_a_matrix_build_is_reusable() {
    let dir = TempDir::new().unwrap();
    let project = write_project(dir.path(), "demo", "1.0");
    let shared = Arc::new(MemoryTransport::new());
    let linux_wheel = sample_wheel("demo", "1.0", "platform = 'linux'");
    let mac_wheel = sample_wheel("demo", "1.0", "platform = 'mac'");

    // Both platforms publish the same release; mac finishes last
    let mut published = Vec::new();
    for (id, wheel) in [("linux", &linux_wheel), ("mac", &mac_wheel)] {
        let publisher = BuildEngine::new(
            open_cache(&dir.path().join(format!("publisher-{}", id))).await,
            Arc::new(CountingBuilder::with_id(wheel.clone(), id)),
            BuildOptions {
                publish: true,
                ..BuildOptions::default()
            },
        )
        .with_registry(registry(shared.clone()));
        published.push(publisher.build(&request(&project)).await.unwrap().digest);
        std::fs::remove_dir_all(project.join("dist")).unwrap();
    }
    assert_eq!(shared.blob_count(), 2);

    for (id, wheel, expected) in [
        ("linux", &linux_wheel, &published[0]),
        ("mac", &mac_wheel, &published[1]),
    ] {
        let builder = Arc::new(CountingBuilder::with_id(wheel.clone(), id));
        let consumer = BuildEngine::new(
            open_cache(&dir.path().join(format!("consumer-{}", id))).await,
            builder.clone(),
            BuildOptions::default(),
        )
        .with_registry(registry(shared.clone()));

        let fetched = consumer.build(&request(&project)).await.unwrap();
        assert_eq!(fetched.origin, ArtifactOrigin::Registry, "{} rebuilt", id);
        assert_eq!(&fetched.digest, expected);
        assert_eq!(builder.calls(), 0);
        std::fs::remove_dir_all(project.join("dist")).unwrap();
    }
}
