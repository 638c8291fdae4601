//! HTTP registry behavior against a mock server

use crate::common::{sample_wheel, wheel_file_name};
use serial_test::serial;
use tempfile::TempDir;
use wheelsmith::cache::{ArtifactCache, CacheEntry, CacheLimits};
use wheelsmith::config::Config;
use wheelsmith::error::WheelsmithError;
use wheelsmith::hash::Digest;
use wheelsmith::registry::{ArtifactId, PushOutcome, RegistryConfig, RegistryRecord, WheelRegistry};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record_for(bytes: &[u8]) -> RegistryRecord {
    RegistryRecord {
        digest: Digest::of_bytes(bytes),
        name: "demo".to_string(),
        version: "1.0".to_string(),
        source_spec_hash: "fp-demo".to_string(),
        size_bytes: bytes.len() as u64,
        file_name: wheel_file_name("demo", "1.0"),
    }
}

fn registry(server: &MockServer) -> WheelRegistry {
    WheelRegistry::new(RegistryConfig::new(&server.uri(), "ns").unwrap())
}

async fn cached_entry(dir: &TempDir, bytes: &[u8]) -> (ArtifactCache, CacheEntry) {
    let cache = ArtifactCache::open(dir.path().join("cache"), CacheLimits::default())
        .await
        .unwrap();
    let entry = cache
        .insert_bytes(bytes, &wheel_file_name("demo", "1.0"), "fp-demo")
        .await
        .unwrap();
    (cache, entry)
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_by_package_verifies_and_caches() {
    let server = MockServer::start().await;
    let bytes = sample_wheel("demo", "1.0", "v = 1");
    let record = record_for(&bytes);

    Mock::given(method("GET"))
        .and(path("/ns/packages/demo/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&record))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/ns/blobs/{}", record.digest)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = ArtifactCache::open(dir.path().join("cache"), CacheLimits::default())
        .await
        .unwrap();
    let id = ArtifactId::parse("demo==1.0").unwrap();
    let entry = registry(&server)
        .pull_into(&id, &cache)
        .await
        .unwrap()
        .expect("artifact should be found");

    assert_eq!(entry.digest, record.digest);
    assert_eq!(entry.source_spec_hash, "fp-demo");
    assert_eq!(cache.stats().await.entry_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_package_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ns/packages/demo/9.9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let id = ArtifactId::parse("demo==9.9").unwrap();
    assert!(registry(&server).pull(&id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn tampered_blob_is_rejected() {
    let server = MockServer::start().await;
    let bytes = sample_wheel("demo", "1.0", "v = 1");
    let record = record_for(&bytes);

    Mock::given(method("GET"))
        .and(path("/ns/packages/demo/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&record))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/ns/blobs/{}", record.digest)))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(sample_wheel("demo", "1.0", "v = 2")),
        )
        .mount(&server)
        .await;

    let id = ArtifactId::parse("demo==1.0").unwrap();
    let err = registry(&server).pull(&id).await.unwrap_err();
    assert!(matches!(err, WheelsmithError::CorruptEntry { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let id = ArtifactId::parse("demo==1.0").unwrap();
    let err = registry(&server).pull(&id).await.unwrap_err();
    assert!(err.is_retryable());
}

/// Mount 201 responses for every upload except the digest record
async fn accept_uploads(server: &MockServer, hex: &str) {
    for route in [
        format!("/ns/blobs/{}", hex),
        "/ns/packages/demo/1.0".to_string(),
        "/ns/sources/fp-demo".to_string(),
    ] {
        Mock::given(method("PUT"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(201))
            .mount(server)
            .await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn push_uploads_blob_and_records() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let bytes = sample_wheel("demo", "1.0", "v = 1");
    let (_cache, entry) = cached_entry(&dir, &bytes).await;
    let hex = entry.digest.to_string();

    Mock::given(method("HEAD"))
        .and(path(format!("/ns/records/{}", hex)))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    accept_uploads(&server, &hex).await;
    Mock::given(method("PUT"))
        .and(path(format!("/ns/records/{}", hex)))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = registry(&server).push(&entry, &bytes).await.unwrap();
    assert_eq!(outcome, PushOutcome::Uploaded);

    let puts: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT")
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(
        puts,
        vec![
            format!("/ns/blobs/{}", hex),
            "/ns/packages/demo/1.0".to_string(),
            "/ns/sources/fp-demo".to_string(),
            format!("/ns/records/{}", hex),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_push_is_redone_by_the_next_one() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let bytes = sample_wheel("demo", "1.0", "v = 1");
    let (_cache, entry) = cached_entry(&dir, &bytes).await;
    let hex = entry.digest.to_string();

    // The blob from the first attempt is on the server; the record is not
    Mock::given(method("HEAD"))
        .and(path(format!("/ns/blobs/{}", hex)))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(format!("/ns/records/{}", hex)))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;
    accept_uploads(&server, &hex).await;
    Mock::given(method("PUT"))
        .and(path(format!("/ns/records/{}", hex)))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/ns/records/{}", hex)))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry(&server);
    let err = registry.push(&entry, &bytes).await.unwrap_err();
    assert!(err.is_retryable());

    let outcome = registry.push(&entry, &bytes).await.unwrap();
    assert_eq!(outcome, PushOutcome::Uploaded);
}

#[tokio::test(flavor = "multi_thread")]
async fn push_of_present_blob_is_noop() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let bytes = sample_wheel("demo", "1.0", "v = 1");
    let (_cache, entry) = cached_entry(&dir, &bytes).await;

    Mock::given(method("HEAD"))
        .and(path(format!("/ns/records/{}", entry.digest)))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = registry(&server).push(&entry, &bytes).await.unwrap();
    assert_eq!(outcome, PushOutcome::AlreadyPresent);
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_by_build_fingerprint() {
    let server = MockServer::start().await;
    let bytes = sample_wheel("demo", "1.0", "v = 1");
    let record = record_for(&bytes);

    Mock::given(method("GET"))
        .and(path("/ns/sources/fp-demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&record))
        .mount(&server)
        .await;
    // A pointer that names the wrong build
    Mock::given(method("GET"))
        .and(path("/ns/sources/fp-other"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&record))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/ns/blobs/{}", record.digest)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
        .mount(&server)
        .await;

    let registry = registry(&server);
    let pulled = registry
        .pull(&ArtifactId::source("fp-demo").unwrap())
        .await
        .unwrap()
        .expect("artifact for the fingerprint");
    assert_eq!(pulled.record.digest, record.digest);

    let err = registry
        .pull(&ArtifactId::source("fp-other").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, WheelsmithError::RegistryProtocol(_)));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn token_from_environment_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(header("Authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.registry.endpoint = Some(server.uri());
    config.registry.namespace = "ns".to_string();
    config.registry.token_env = "WHEELSMITH_TEST_REGISTRY_TOKEN".to_string();
    std::env::set_var("WHEELSMITH_TEST_REGISTRY_TOKEN", "s3cret");
    let settings = config.registry_config().unwrap().unwrap();
    std::env::remove_var("WHEELSMITH_TEST_REGISTRY_TOKEN");

    let dir = TempDir::new().unwrap();
    let bytes = sample_wheel("demo", "1.0", "v = 1");
    let (_cache, entry) = cached_entry(&dir, &bytes).await;

    let outcome = WheelRegistry::new(settings).push(&entry, &bytes).await.unwrap();
    assert_eq!(outcome, PushOutcome::AlreadyPresent);
}
