// tests/repodata_cache.rs

//! Repodata caching and conditional revalidation

mod common;

use common::{FakeResponse, FakeTransport};
use condafetch::fetch::{DownloadEngine, EngineOptions, FileTransport, RetryPolicy, Transport};
use condafetch::repodata::{RepodataStatus, RepodataTarget, update_repodata};
use std::sync::Arc;

const SUBDIR: &str = "https://conda.anaconda.org/conda-forge/linux-64";
const REPODATA_URL: &str = "https://conda.anaconda.org/conda-forge/linux-64/repodata.json";

fn engine(transport: &Arc<FakeTransport>) -> DownloadEngine {
    let transport: Arc<dyn Transport> = transport.clone();
    DownloadEngine::new(transport, EngineOptions::default())
}

#[tokio::test]
async fn test_download_then_revalidate() {
    let cache = tempfile::tempdir().unwrap();
    let body = br#"{"info": {"subdir": "linux-64"}, "packages": {}}"#;
    let transport = Arc::new(
        FakeTransport::new()
            .route(
                REPODATA_URL,
                FakeResponse::ok(body)
                    .with_header("ETag", "\"v1\"")
                    .with_header("Cache-Control", "public, max-age=1200"),
            )
            .route(REPODATA_URL, FakeResponse::status(304)),
    );
    let engine = engine(&transport);

    // First run: nothing cached
    let target = RepodataTarget::new(SUBDIR, cache.path());
    assert!(target.state().is_none());
    let outcomes = update_repodata(&engine, &[target], 0, &RetryPolicy::none())
        .await
        .unwrap();
    assert_eq!(outcomes[0].status, RepodataStatus::Downloaded);
    assert_eq!(outcomes[0].name, "conda-forge/linux-64");
    assert_eq!(std::fs::read(&outcomes[0].cache_path).unwrap(), body);

    // State was recorded
    let target = RepodataTarget::new(SUBDIR, cache.path());
    let state = target.state().unwrap();
    assert_eq!(state.etag.as_deref(), Some("\"v1\""));
    assert_eq!(state.max_age(), Some(1200));
    let first_fetch = state.fetched_at;

    // Second run with ttl 0: conditional request, 304 keeps the cache
    let outcomes = update_repodata(&engine, &[target], 0, &RetryPolicy::none())
        .await
        .unwrap();
    assert_eq!(outcomes[0].status, RepodataStatus::NotModified);
    assert_eq!(std::fs::read(&outcomes[0].cache_path).unwrap(), body);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].header("If-None-Match").is_none());
    assert_eq!(requests[1].header("If-None-Match"), Some("\"v1\""));
    assert_eq!(requests[1].header("Content-Type"), Some("application/json"));

    let refreshed = RepodataTarget::new(SUBDIR, cache.path());
    assert!(refreshed.state().unwrap().fetched_at >= first_fetch);
}

#[tokio::test]
async fn test_fresh_cache_skips_network() {
    let cache = tempfile::tempdir().unwrap();
    let transport = Arc::new(FakeTransport::new().route(
        REPODATA_URL,
        FakeResponse::ok(b"{}").with_header("Cache-Control", "max-age=3600"),
    ));
    let engine = engine(&transport);

    let target = RepodataTarget::new(SUBDIR, cache.path());
    update_repodata(&engine, &[target], 1, &RetryPolicy::none())
        .await
        .unwrap();

    // ttl 1 honors max-age
    let target = RepodataTarget::new(SUBDIR, cache.path());
    let outcomes = update_repodata(&engine, &[target], 1, &RetryPolicy::none())
        .await
        .unwrap();
    assert_eq!(outcomes[0].status, RepodataStatus::Fresh);
    assert_eq!(transport.request_count(REPODATA_URL), 1);
}

#[tokio::test]
async fn test_error_status_keeps_previous_cache() {
    let cache = tempfile::tempdir().unwrap();
    let transport = Arc::new(
        FakeTransport::new()
            .route(REPODATA_URL, FakeResponse::ok(b"{\"v\": 1}").with_header("ETag", "\"v1\""))
            .route(REPODATA_URL, FakeResponse::status(404)),
    );
    let engine = engine(&transport);

    let target = RepodataTarget::new(SUBDIR, cache.path());
    update_repodata(&engine, &[target], 0, &RetryPolicy::none())
        .await
        .unwrap();

    let target = RepodataTarget::new(SUBDIR, cache.path());
    let cache_path = target.cache_path().to_path_buf();
    let result = update_repodata(&engine, &[target], 0, &RetryPolicy::none()).await;

    assert!(result.is_err());
    assert_eq!(std::fs::read(&cache_path).unwrap(), b"{\"v\": 1}");
}

#[tokio::test]
async fn test_local_channel_revalidation() {
    let channel = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let subdir = channel.path().join("noarch");
    std::fs::create_dir_all(&subdir).unwrap();
    std::fs::write(subdir.join("repodata.json"), b"{\"packages\": {}}").unwrap();

    let subdir_url = url::Url::from_directory_path(&subdir).unwrap().to_string();
    let engine = DownloadEngine::new(Arc::new(FileTransport::new()), EngineOptions::default());

    let target = RepodataTarget::new(&subdir_url, cache.path());
    let outcomes = update_repodata(&engine, &[target], 0, &RetryPolicy::none())
        .await
        .unwrap();
    assert_eq!(outcomes[0].status, RepodataStatus::Downloaded);

    // The file's mtime comes back as Last-Modified and matches on revalidation
    let target = RepodataTarget::new(&subdir_url, cache.path());
    assert!(target.state().unwrap().last_modified.is_some());
    let outcomes = update_repodata(&engine, &[target], 0, &RetryPolicy::none())
        .await
        .unwrap();
    assert_eq!(outcomes[0].status, RepodataStatus::NotModified);
}
