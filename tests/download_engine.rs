// tests/download_engine.rs

//! Download engine behavior against a scripted transport

mod common;

use common::{FakeResponse, FakeTransport, ProgressEvent, RecordingProgress};
use condafetch::fetch::{
    DownloadEngine, EngineOptions, FileTransport, PROGRESS_INTERVAL, RetryPolicy, Transfer,
    TransferState, Transport,
};
use condafetch::{Error, Hash, ValidationError, hash};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn engine_with(transport: &Arc<FakeTransport>, max_parallel: usize) -> DownloadEngine {
    let transport: Arc<dyn Transport> = transport.clone();
    DownloadEngine::new(
        transport,
        EngineOptions {
            max_parallel,
            ..EngineOptions::default()
        },
    )
}

fn transfer(dir: &TempDir, url: &str) -> Transfer {
    let name = url.rsplit('/').next().unwrap_or(url);
    Transfer::new(name, url, dir.path().join(name))
}

#[tokio::test]
async fn test_download_writes_destination() {
    let dir = tempfile::tempdir().unwrap();
    let body = b"package contents that span a few chunks of the fake body";
    let url = "https://x.org/c/linux-64/pkg-1.0-0.tar.bz2";
    let transport = Arc::new(FakeTransport::new().route(url, FakeResponse::ok(body)));

    let engine = engine_with(&transport, 2);
    let report = engine
        .run(vec![transfer(&dir, url).with_expected_size(body.len() as u64)], false)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.total_bytes(), body.len() as u64);
    let written = std::fs::read(dir.path().join("pkg-1.0-0.tar.bz2")).unwrap();
    assert_eq!(written, body);
}

#[tokio::test]
async fn test_size_mismatch_fails_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://x.org/c/noarch/short.conda";
    let transport = Arc::new(FakeTransport::new().route(url, FakeResponse::ok(&[7u8; 90])));

    let engine = engine_with(&transport, 1);
    let report = engine
        .run(vec![transfer(&dir, url).with_expected_size(100)], false)
        .await
        .unwrap();

    let result = &report.transfers[0];
    assert_eq!(result.state(), TransferState::Failed);
    match result.error() {
        Some(Error::Validation(ValidationError::SizeMismatch { expected, actual, .. })) => {
            assert_eq!(*expected, 100);
            assert_eq!(*actual, 90);
        }
        other => panic!("expected size mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_checksum_mismatch_fails_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://x.org/c/noarch/pkg.conda";
    let transport = Arc::new(FakeTransport::new().route(url, FakeResponse::ok(b"actual")));
    let wrong = Hash::sha256(hash::sha256(b"expected")).unwrap();

    let engine = engine_with(&transport, 1);
    let report = engine
        .run(vec![transfer(&dir, url).with_checksum(wrong)], false)
        .await
        .unwrap();

    assert!(matches!(
        report.transfers[0].error(),
        Some(Error::Validation(ValidationError::ChecksumMismatch { .. }))
    ));
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let mut transport = FakeTransport::new();
    let mut transfers = Vec::new();
    for i in 0..12 {
        let url = format!("https://x.org/c/noarch/pkg-{i}.conda");
        transport = transport.route(
            &url,
            FakeResponse::ok(b"data").with_delay(Duration::from_millis(30)),
        );
        transfers.push(transfer(&dir, &url));
    }
    let transport = Arc::new(transport);

    let engine = engine_with(&transport, 3);
    let report = engine.run(transfers, false).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.transfers.len(), 12);
    assert!(transport.max_active() <= 3, "saw {} active", transport.max_active());
    assert!(transport.max_active() >= 2);
}

#[tokio::test]
async fn test_report_keeps_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let slow = "https://x.org/c/noarch/slow.conda";
    let fast = "https://x.org/c/noarch/fast.conda";
    let transport = Arc::new(
        FakeTransport::new()
            .route(slow, FakeResponse::ok(b"slow").with_delay(Duration::from_millis(80)))
            .route(fast, FakeResponse::ok(b"fast")),
    );

    let engine = engine_with(&transport, 2);
    let report = engine
        .run(vec![transfer(&dir, slow), transfer(&dir, fast)], false)
        .await
        .unwrap();

    let names: Vec<&str> = report.transfers.iter().map(Transfer::name).collect();
    assert_eq!(names, vec!["slow.conda", "fast.conda"]);
}

#[tokio::test]
async fn test_interrupt_stops_batch() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://x.org/c/noarch/never.conda";
    let transport = Arc::new(FakeTransport::new().route(url, FakeResponse::hanging()));

    let engine = engine_with(&transport, 2);
    let flag = engine.interrupt_flag().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        flag.raise();
    });

    let started = Instant::now();
    let result = engine.run(vec![transfer(&dir, url)], false).await;

    assert!(matches!(result, Err(Error::Interrupted)));
    // Observed within one poll interval plus the idle backoff
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_interrupt_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://x.org/c/noarch/pkg.conda";
    let transport = Arc::new(FakeTransport::new().route(url, FakeResponse::ok(b"x")));

    let engine = engine_with(&transport, 2);
    engine.interrupt_flag().raise();

    let result = engine.run(vec![transfer(&dir, url)], false).await;
    assert!(result.unwrap_err().is_interrupted());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_fail_fast_returns_first_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = "https://x.org/c/noarch/missing.conda";
    let slow = "https://x.org/c/noarch/slow.conda";
    let transport = Arc::new(
        FakeTransport::new()
            .route(missing, FakeResponse::status(404))
            .route(slow, FakeResponse::ok(b"slow").with_delay(Duration::from_secs(5))),
    );

    let engine = engine_with(&transport, 2);
    let started = Instant::now();
    let result = engine
        .run(vec![transfer(&dir, slow), transfer(&dir, missing)], true)
        .await;

    match result {
        Err(Error::HttpStatus { status, url }) => {
            assert_eq!(status, 404);
            assert_eq!(url, missing);
        }
        other => panic!("expected 404, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_failures_collected_without_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let good = "https://x.org/c/noarch/good.conda";
    let bad = "https://x.org/c/noarch/bad.conda";
    let transport = Arc::new(
        FakeTransport::new()
            .route(good, FakeResponse::ok(b"good"))
            .route(bad, FakeResponse::status(500)),
    );

    let engine = engine_with(&transport, 4);
    let report = engine
        .run(vec![transfer(&dir, good), transfer(&dir, bad)], false)
        .await
        .unwrap();

    assert_eq!(report.completed().count(), 1);
    assert_eq!(report.failed().count(), 1);
    match report.into_result() {
        Err(Error::BatchFailed { failed, total, details }) => {
            assert_eq!((failed, total), (1, 2));
            assert!(details.contains("bad.conda"));
        }
        other => panic!("expected batch failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_not_modified_keeps_destination_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://x.org/c/linux-64/repodata.json";
    let transport = Arc::new(FakeTransport::new().route(url, FakeResponse::status(304)));

    let conditional = transfer(&dir, url).with_cache_headers(Some("\"abc\"".into()), None);
    let engine = engine_with(&transport, 1);
    let report = engine.run(vec![conditional], true).await.unwrap();

    let result = &report.transfers[0];
    assert!(result.is_completed());
    assert!(result.is_not_modified());
    assert!(!dir.path().join("repodata.json").exists());

    let request = &transport.requests()[0];
    assert_eq!(request.header("If-None-Match"), Some("\"abc\""));
    assert!(request.header("If-Modified-Since").is_none());
}

#[tokio::test]
async fn test_retry_recovers_from_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://x.org/c/noarch/flaky.conda";
    let transport = Arc::new(
        FakeTransport::new()
            .route(url, FakeResponse::status(503))
            .route(url, FakeResponse::ok(b"finally")),
    );
    let policy = RetryPolicy {
        max_retries: 2,
        retry_timeout: Duration::from_millis(10),
        retry_backoff: 1,
    };

    let engine = engine_with(&transport, 1);
    let report = engine
        .run_with_retry(vec![transfer(&dir, url)], &policy, true)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(transport.request_count(url), 2);
    assert_eq!(std::fs::read(dir.path().join("flaky.conda")).unwrap(), b"finally");
}

#[tokio::test]
async fn test_retry_gives_up() {
    let dir = tempfile::tempdir().unwrap();
    let flaky = "https://x.org/c/noarch/down.conda";
    let missing = "https://x.org/c/noarch/missing.conda";
    let transport = Arc::new(
        FakeTransport::new()
            .route(flaky, FakeResponse::network_error("connection reset"))
            .route(missing, FakeResponse::status(404)),
    );
    let policy = RetryPolicy {
        max_retries: 2,
        retry_timeout: Duration::from_millis(5),
        retry_backoff: 2,
    };

    let engine = engine_with(&transport, 2);
    let report = engine
        .run_with_retry(vec![transfer(&dir, flaky), transfer(&dir, missing)], &policy, false)
        .await
        .unwrap();

    assert_eq!(report.failed().count(), 2);
    // One attempt plus two retries for the network error, none for the 404
    assert_eq!(transport.request_count(flaky), 3);
    assert_eq!(transport.request_count(missing), 1);
    assert_eq!(report.transfers[0].name(), "down.conda");
}

#[tokio::test]
async fn test_progress_events_follow_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let good = "https://x.org/c/noarch/good.conda";
    let bad = "https://x.org/c/noarch/bad.conda";
    let transport = Arc::new(
        FakeTransport::new()
            .route(good, FakeResponse::ok(b"abcdef"))
            .route(bad, FakeResponse::status(404)),
    );
    let progress = Arc::new(RecordingProgress::new());

    let engine = engine_with(&transport, 2).with_progress(progress.clone());
    engine
        .run(vec![transfer(&dir, good), transfer(&dir, bad)], false)
        .await
        .unwrap();

    let events = progress.events();
    assert!(events.contains(&ProgressEvent::Added(0, "good.conda".into())));
    assert!(events.contains(&ProgressEvent::Added(1, "bad.conda".into())));
    assert!(events.contains(&ProgressEvent::Finished(0, 6)));
    assert!(events.iter().any(|e| matches!(e, ProgressEvent::Failed(1, _))));

    let added = events.iter().position(|e| *e == ProgressEvent::Added(0, "good.conda".into()));
    let finished = events.iter().position(|e| *e == ProgressEvent::Finished(0, 6));
    assert!(added < finished);
}

#[tokio::test]
async fn test_file_transport_end_to_end() {
    let source = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let body = vec![42u8; 10_000];
    let path = source.path().join("local-1.0-0.conda");
    std::fs::write(&path, &body).unwrap();

    let url = url::Url::from_file_path(&path).unwrap().to_string();
    let checksum = Hash::sha256(hash::sha256(&body)).unwrap();
    let transfer = Transfer::new("local-1.0-0.conda", url, dest.path().join("local-1.0-0.conda"))
        .with_expected_size(body.len() as u64)
        .with_checksum(checksum);

    let engine = DownloadEngine::new(Arc::new(FileTransport::new()), EngineOptions::default());
    let report = engine.run(vec![transfer], true).await.unwrap();

    assert!(report.is_success());
    assert_eq!(std::fs::read(dest.path().join("local-1.0-0.conda")).unwrap(), body);
}

#[tokio::test]
async fn test_streaming_transfer_is_not_backed_off() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://x.org/c/noarch/slow.conda";
    let transport = Arc::new(
        FakeTransport::new().route(url, FakeResponse::trickle(20, Duration::from_millis(25))),
    );
    let transport_dyn: Arc<dyn Transport> = transport.clone();
    // Short waits and a long backoff make any stall obvious
    let engine = DownloadEngine::new(
        transport_dyn,
        EngineOptions {
            max_parallel: 1,
            poll_interval: Duration::from_millis(50),
            idle_backoff: Duration::from_millis(200),
        },
    );

    let started = Instant::now();
    let report = engine.run(vec![transfer(&dir, url)], true).await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.is_success());
    assert_eq!(report.transfers[0].downloaded_size(), 20);
    // 20 chunks at 25 ms take about 500 ms when never paused
    assert!(elapsed < Duration::from_millis(900), "took {elapsed:?}");
}

#[tokio::test]
async fn test_shared_destination_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let linux = "https://x.org/c/linux-64/repodata.json";
    let noarch = "https://x.org/c/noarch/repodata.json";
    let transport = Arc::new(
        FakeTransport::new()
            .route(linux, FakeResponse::ok(b"{\"subdir\": \"linux-64\"}"))
            .route(noarch, FakeResponse::ok(b"{\"subdir\": \"noarch\"}")),
    );

    let engine = engine_with(&transport, 2);
    let err = engine
        .run(vec![transfer(&dir, linux), transfer(&dir, noarch)], false)
        .await
        .unwrap_err();

    match err {
        Error::ConfigError(message) => assert!(message.contains("repodata.json"), "{message}"),
        other => panic!("expected destination clash, got {:?}", other),
    }
    assert!(transport.requests().is_empty());
    assert!(!dir.path().join("repodata.json").exists());
}

#[tokio::test]
async fn test_fail_fast_with_retry_stops_on_terminal_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = "https://x.org/c/noarch/missing.conda";
    let later = "https://x.org/c/noarch/later.conda";
    let transport = Arc::new(
        FakeTransport::new()
            .route(missing, FakeResponse::status(404))
            .route(later, FakeResponse::ok(b"never fetched")),
    );
    let policy = RetryPolicy {
        max_retries: 2,
        retry_timeout: Duration::from_millis(5),
        retry_backoff: 1,
    };

    let engine = engine_with(&transport, 1);
    let err = engine
        .run_with_retry(vec![transfer(&dir, missing), transfer(&dir, later)], &policy, true)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
    assert_eq!(transport.request_count(missing), 1);
    assert_eq!(transport.request_count(later), 0);
}

#[tokio::test]
async fn test_progress_burst_is_throttled() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://x.org/c/noarch/burst.conda";
    // 256 chunks, all immediately available
    let body = vec![7u8; 4096];
    let transport = Arc::new(FakeTransport::new().route(url, FakeResponse::ok(&body)));
    let progress = Arc::new(RecordingProgress::new());

    let engine = engine_with(&transport, 1).with_progress(progress.clone());
    let report = engine.run(vec![transfer(&dir, url)], true).await.unwrap();

    assert!(report.is_success());
    let updates = progress.update_count(0);
    assert!((1..=2).contains(&updates), "{updates} updates");
    assert!(progress.events().contains(&ProgressEvent::Updated(0, 4096)));
}

#[tokio::test]
async fn test_progress_updates_are_spaced() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://x.org/c/noarch/steady.conda";
    let transport = Arc::new(
        FakeTransport::new().route(url, FakeResponse::trickle(40, Duration::from_millis(20))),
    );
    let progress = Arc::new(RecordingProgress::new());

    let engine = engine_with(&transport, 1).with_progress(progress.clone());
    engine.run(vec![transfer(&dir, url)], true).await.unwrap();

    let times = progress.update_times(0);
    assert!(times.len() >= 3, "{} updates", times.len());

    // The last update marks completion and is exempt
    let slack = Duration::from_millis(2);
    for pair in times[..times.len() - 1].windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap + slack >= PROGRESS_INTERVAL, "updates {gap:?} apart");
    }
}
