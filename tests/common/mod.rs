// tests/common/mod.rs

//! Shared test utilities: a scripted in-memory transport and a progress
//! sink that records every event.

#![allow(dead_code)]

use async_trait::async_trait;
use condafetch::fetch::{
    ProgressSink, ProgressUpdate, ResponseStream, TransferId, TransferRequest, Transport,
};
use condafetch::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Scripted answer for one request
#[derive(Debug, Clone)]
pub struct FakeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Vec<u8>>,
    pub delay: Duration,
    pub chunk_delay: Duration,
    pub hang: bool,
    pub error: Option<String>,
}

impl FakeResponse {
    pub fn ok(body: &[u8]) -> Self {
        Self::status(200).with_body(body)
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
            delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            hang: false,
            error: None,
        }
    }

    /// Connection-level failure
    pub fn network_error(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::status(0)
        }
    }

    /// Headers arrive, the body never does
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::status(200)
        }
    }

    /// Body delivered in 16-byte chunks
    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.chunks = body.chunks(16).map(<[u8]>::to_vec).collect();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Delay before the headers arrive
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Body of `body_len` one-byte chunks, each arriving after `delay`
    pub fn trickle(body_len: usize, delay: Duration) -> Self {
        Self {
            chunks: vec![vec![b'x']; body_len],
            chunk_delay: delay,
            ..Self::status(200)
        }
    }
}

/// In-memory transport answering from per-URL scripts
///
/// Each URL has a queue of responses; the last one is repeated once the
/// queue is down to a single entry. Unscripted URLs get a 404.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, VecDeque<FakeResponse>>>,
    requests: Mutex<Vec<TransferRequest>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: &str, response: FakeResponse) -> Self {
        self.routes
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// All requests started so far, in order
    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.url == url).count()
    }

    /// Highest number of simultaneously open responses
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_response(&self, url: &str) -> FakeResponse {
        let mut routes = self.routes.lock();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| FakeResponse::status(404)),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| FakeResponse::status(404)),
            None => FakeResponse::status(404),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start(&self, request: &TransferRequest) -> Result<Box<dyn ResponseStream>> {
        self.requests.lock().push(request.clone());
        let response = self.next_response(&request.url);

        let guard = ActiveGuard::enter(self.active.clone(), &self.max_active);
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }

        if let Some(message) = response.error {
            return Err(Error::TransferError {
                url: request.url.clone(),
                message,
            });
        }

        Ok(Box::new(FakeStream {
            status: response.status,
            url: request.url.clone(),
            headers: response.headers,
            chunks: response.chunks.into(),
            chunk_delay: response.chunk_delay,
            hang: response.hang,
            _guard: guard,
        }))
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(active: Arc<AtomicUsize>, max_active: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeStream {
    status: u16,
    url: String,
    headers: Vec<(String, String)>,
    chunks: VecDeque<Vec<u8>>,
    chunk_delay: Duration,
    hang: bool,
    _guard: ActiveGuard,
}

#[async_trait]
impl ResponseStream for FakeStream {
    fn status(&self) -> u16 {
        self.status
    }

    fn final_url(&self) -> &str {
        &self.url
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    fn content_length(&self) -> Option<u64> {
        if self.hang {
            return None;
        }
        Some(self.chunks.iter().map(|c| c.len() as u64).sum())
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if !self.chunk_delay.is_zero() && !self.chunks.is_empty() {
            tokio::time::sleep(self.chunk_delay).await;
        }
        Ok(self.chunks.pop_front())
    }
}

/// Progress event as seen by [`RecordingProgress`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Added(TransferId, String),
    Updated(TransferId, u64),
    Finished(TransferId, u64),
    Failed(TransferId, String),
}

#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
    update_times: Mutex<Vec<(TransferId, Instant)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Number of `update` calls for one transfer
    pub fn update_count(&self, id: TransferId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Updated(i, _) if *i == id))
            .count()
    }

    /// When each `update` call for one transfer arrived
    pub fn update_times(&self, id: TransferId) -> Vec<Instant> {
        self.update_times
            .lock()
            .iter()
            .filter(|(i, _)| *i == id)
            .map(|(_, t)| *t)
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn add_transfer(&self, id: TransferId, name: &str, _expected_size: Option<u64>) {
        self.events.lock().push(ProgressEvent::Added(id, name.to_string()));
    }

    fn update(&self, id: TransferId, update: ProgressUpdate) {
        self.update_times.lock().push((id, Instant::now()));
        self.events.lock().push(ProgressEvent::Updated(id, update.downloaded));
    }

    fn finish(&self, id: TransferId, downloaded: u64) {
        self.events.lock().push(ProgressEvent::Finished(id, downloaded));
    }

    fn fail(&self, id: TransferId, error: &str) {
        self.events.lock().push(ProgressEvent::Failed(id, error.to_string()));
    }
}
