//! Artifact cache behaviour across tasks and reopen

use crate::common::{build_archive, sample_wheel, wheel_file_name};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;
use wheelsmith::cache::{ArtifactCache, CacheKey, CacheLimits};
use wheelsmith::error::{ValidationError, WheelsmithError};

fn count_files(dir: &std::path::Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_inserts_store_one_blob() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(
        ArtifactCache::open(dir.path().join("cache"), CacheLimits::default())
            .await
            .unwrap(),
    );
    let bytes = Arc::new(sample_wheel("demo", "1.0", "x = 1\n"));

    let mut handles = Vec::new();
    for i in 0..8 {
        let cache = Arc::clone(&cache);
        let bytes = Arc::clone(&bytes);
        handles.push(tokio::spawn(async move {
            cache
                .insert_bytes(&bytes, &wheel_file_name("demo", "1.0"), &format!("fp-{}", i))
                .await
                .unwrap()
        }));
    }

    let mut digests = Vec::new();
    for handle in handles {
        digests.push(handle.await.unwrap().digest);
    }
    digests.dedup();
    assert_eq!(digests.len(), 1);

    assert_eq!(cache.stats().await.entry_count, 1);
    assert_eq!(count_files(&dir.path().join("cache/blobs")), 1);
    assert_eq!(count_files(&dir.path().join("cache/tmp")), 0);

    // Every fingerprint resolves to the shared entry
    for i in 0..8 {
        let hit = cache
            .lookup(&CacheKey::Fingerprint(format!("fp-{}", i)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.digest(), &digests[0]);
    }
}

#[tokio::test]
async fn traversal_archive_never_reaches_storage() {
    let dir = TempDir::new().unwrap();
    let cache = ArtifactCache::open(dir.path().join("cache"), CacheLimits::default())
        .await
        .unwrap();
    let evil = build_archive(&[
        ("../../evil.py", "boom"),
        ("demo-1.0.dist-info/METADATA", "Name: demo\nVersion: 1.0\n"),
        ("demo-1.0.dist-info/WHEEL", "Wheel-Version: 1.0\n"),
    ]);

    let err = cache
        .insert_bytes(&evil, "demo-1.0-py3-none-any.whl", "fp")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WheelsmithError::ValidationFailed(ValidationError::UnsafeArchivePath { .. })
    ));
    assert_eq!(cache.stats().await.entry_count, 0);
    assert_eq!(count_files(&dir.path().join("cache/blobs")), 0);
    assert!(!dir.path().join("evil.py").exists());
}

#[tokio::test]
async fn entries_and_access_times_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");

    let digest = {
        let cache = ArtifactCache::open(&root, CacheLimits::default()).await.unwrap();
        let entry = cache
            .insert_bytes(&sample_wheel("demo", "1.0", ""), "demo-1.0-py3-none-any.whl", "fp-1")
            .await
            .unwrap();
        cache.close().await.unwrap();
        entry.digest
    };

    let cache = ArtifactCache::open(&root, CacheLimits::default()).await.unwrap();
    let hit = cache
        .lookup(&CacheKey::Fingerprint("fp-1".to_string()))
        .await
        .unwrap()
        .expect("fingerprint survives reopen");
    assert_eq!(hit.digest(), &digest);
}

#[tokio::test]
async fn lru_eviction_keeps_recently_used() {
    let dir = TempDir::new().unwrap();
    let limits = CacheLimits {
        max_entries: 2,
        ..CacheLimits::default()
    };
    let cache = ArtifactCache::open(dir.path().join("cache"), limits).await.unwrap();

    let mut inserted = Vec::new();
    for name in ["a", "b", "c"] {
        let entry = cache
            .insert_bytes(&sample_wheel(name, "1.0", name), &wheel_file_name(name, "1.0"), name)
            .await
            .unwrap();
        inserted.push(entry.digest);
    }

    // a is now the most recent, b the least
    drop(cache.lookup(&CacheKey::Digest(inserted[0].clone())).await.unwrap());
    cache.evict_if_over_budget().await.unwrap();

    assert!(cache.get(&inserted[0]).await.is_some());
    assert!(cache.get(&inserted[1]).await.is_none());
    assert!(cache.get(&inserted[2]).await.is_some());
}

/// Two handles on one root, each with its own in-memory index, stand in for
/// two processes sharing a cache directory.
async fn open_pair(root: &std::path::Path) -> (ArtifactCache, ArtifactCache) {
    let a = ArtifactCache::open(root, CacheLimits::default()).await.unwrap();
    let b = ArtifactCache::open(root, CacheLimits::default()).await.unwrap();
    (a, b)
}

async fn put(cache: &ArtifactCache, name: &str, fingerprint: &str) -> wheelsmith::cache::CacheEntry {
    cache
        .insert_bytes(
            &sample_wheel(name, "1.0", name),
            &wheel_file_name(name, "1.0"),
            fingerprint,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn concurrent_writers_keep_each_others_entries() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");
    let (a, b) = open_pair(&root).await;

    put(&a, "left", "fp-left").await;
    put(&b, "right", "fp-right").await;
    a.close().await.unwrap();
    b.close().await.unwrap();

    let reopened = ArtifactCache::open(&root, CacheLimits::default()).await.unwrap();
    for fp in ["fp-left", "fp-right"] {
        assert!(
            reopened
                .lookup(&CacheKey::Fingerprint(fp.to_string()))
                .await
                .unwrap()
                .is_some(),
            "{} lost",
            fp
        );
    }
    assert_eq!(reopened.stats().await.entry_count, 2);
}

#[tokio::test]
async fn insert_by_one_handle_is_found_by_another() {
    let dir = TempDir::new().unwrap();
    let (a, b) = open_pair(&dir.path().join("cache")).await;

    let entry = put(&b, "demo", "fp-demo").await;
    let hit = a
        .lookup(&CacheKey::Fingerprint("fp-demo".to_string()))
        .await
        .unwrap()
        .expect("entry written by the other handle");
    assert_eq!(hit.digest(), &entry.digest);
    assert_eq!(a.stats().await.miss_count, 0);
}

#[tokio::test]
async fn purge_elsewhere_is_a_miss_not_corruption() {
    let dir = TempDir::new().unwrap();
    let (a, b) = open_pair(&dir.path().join("cache")).await;

    let entry = put(&a, "demo", "fp-demo").await;
    b.lookup(&CacheKey::Digest(entry.digest.clone()))
        .await
        .unwrap()
        .expect("visible to the second handle");
    b.purge(&entry.digest).await.unwrap();

    let found = a
        .lookup(&CacheKey::Digest(entry.digest.clone()))
        .await
        .unwrap();
    assert!(found.is_none());

    let stats = a.stats().await;
    assert_eq!(stats.corruption_count, 0);
    assert_eq!(stats.miss_count, 1);
    assert_eq!(stats.entry_count, 0);
}

#[tokio::test]
async fn lease_blocks_removal_from_another_handle() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");
    let a = ArtifactCache::open(&root, CacheLimits::default()).await.unwrap();
    let entry = put(&a, "demo", "fp-demo").await;
    put(&a, "other", "fp-other").await;

    let lease = a
        .lookup(&CacheKey::Digest(entry.digest.clone()))
        .await
        .unwrap()
        .unwrap();

    let limits = CacheLimits {
        max_entries: 1,
        ..CacheLimits::default()
    };
    let b = ArtifactCache::open(&root, limits).await.unwrap();
    assert!(matches!(
        b.purge(&entry.digest).await.unwrap_err(),
        WheelsmithError::EntryInUse(_)
    ));
    // The leased entry is the least recently used one in b's view, yet survives
    let report = b.evict_if_over_budget().await.unwrap();
    assert!(!report.evicted.contains(&entry.digest));
    assert_eq!(b.clear().await.unwrap(), 0);
    assert!(lease.path().is_file());
    assert_eq!(lease.read().await.unwrap().len() as u64, entry.size_bytes);

    drop(lease);
    b.purge(&entry.digest).await.unwrap();
    assert!(!root.join(&entry.storage_path).exists());
}
