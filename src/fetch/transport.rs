// src/fetch/transport.rs
//! Transport abstraction for transfers
//!
//! A [`Transport`] starts a request and hands back a [`ResponseStream`]
//! exposing status, headers and body chunks. Backends:
//! - HTTP/HTTPS via reqwest
//! - `file://` URLs from the local filesystem
//! - [`SchemeTransport`] routing between the two by URL scheme
//!
//! The engine only sees the traits, so tests drive it with in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};

/// What a transfer asks a transport to fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: String,
    /// Extra request headers, in order
    pub headers: Vec<(String, String)>,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Case-insensitive request header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A started response: headers are available, the body is pulled in chunks
#[async_trait]
pub trait ResponseStream: Send {
    /// Status code (HTTP semantics, also for non-HTTP backends)
    fn status(&self) -> u16;

    /// Effective URL after redirects
    fn final_url(&self) -> &str;

    /// Case-insensitive response header lookup
    fn header(&self, name: &str) -> Option<String>;

    /// Announced body length, if any
    fn content_length(&self) -> Option<u64>;

    /// Next body chunk, `None` once the body is exhausted
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Something that can start transfers
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self, request: &TransferRequest) -> Result<Box<dyn ResponseStream>>;
}

// =============================================================================
// HTTP
// =============================================================================

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct HttpTransportOptions {
    /// Idle connections kept per host; set to the parallel download limit
    pub max_connections: usize,
    /// Whole-request timeout
    pub timeout: Option<Duration>,
    pub user_agent: String,
    pub ssl_verify: bool,
}

impl Default for HttpTransportOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            timeout: Some(Duration::from_secs(300)),
            user_agent: format!("condafetch/{}", env!("CARGO_PKG_VERSION")),
            ssl_verify: true,
        }
    }
}

impl HttpTransportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_connections: config.max_parallel_downloads.max(1),
            timeout: config.download_timeout(),
            ssl_verify: config.ssl_verify,
            ..Self::default()
        }
    }
}

/// HTTP/HTTPS transport using reqwest
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(options: &HttpTransportOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(options.max_connections)
            .user_agent(options.user_agent.clone())
            .danger_accept_invalid_certs(!options.ssl_verify);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&self, request: &TransferRequest) -> Result<Box<dyn ResponseStream>> {
        debug!("GET {}", request.url);
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::transfer(&request.url, e))?;

        Ok(Box::new(HttpResponse {
            final_url: response.url().to_string(),
            response,
        }))
    }
}

struct HttpResponse {
    response: reqwest::Response,
    final_url: String,
}

#[async_trait]
impl ResponseStream for HttpResponse {
    fn status(&self) -> u16 {
        self.response.status().as_u16()
    }

    fn final_url(&self) -> &str {
        &self.final_url
    }

    fn header(&self, name: &str) -> Option<String> {
        self.response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
    }

    fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        self.response
            .chunk()
            .await
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .map_err(|e| Error::transfer(&self.final_url, e))
    }
}

// =============================================================================
// file://
// =============================================================================

/// Format a timestamp as an HTTP date (`Tue, 15 Nov 1994 08:12:31 GMT`)
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Serves `file://` URLs from disk
///
/// Missing files answer 404. The file's modification time is reported as
/// `Last-Modified` and an equal `If-Modified-Since` answers 304.
pub struct FileTransport {
    chunk_size: usize,
}

impl FileTransport {
    pub fn new() -> Self {
        Self { chunk_size: 64 * 1024 }
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for FileTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn start(&self, request: &TransferRequest) -> Result<Box<dyn ResponseStream>> {
        let url = Url::parse(&request.url).map_err(|e| Error::transfer(&request.url, e))?;
        let path = url
            .to_file_path()
            .map_err(|_| Error::transfer(&request.url, "not a local file URL"))?;

        let mut response = FileResponse {
            status: 200,
            final_url: request.url.clone(),
            file: None,
            length: None,
            last_modified: None,
            chunk_size: self.chunk_size,
        };

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!("{} does not exist", path.display());
                response.status = 404;
                return Ok(Box::new(response));
            }
            Err(e) => return Err(Error::transfer(&request.url, e)),
        };

        let metadata = file
            .metadata()
            .await
            .map_err(|e| Error::transfer(&request.url, e))?;
        response.length = Some(metadata.len());
        response.last_modified = metadata.modified().ok().map(|t| http_date(t.into()));

        let unchanged = match (request.header("If-Modified-Since"), &response.last_modified) {
            (Some(since), Some(modified)) => since == modified,
            _ => false,
        };
        if unchanged {
            response.status = 304;
            response.length = None;
        } else {
            response.file = Some(file);
        }

        Ok(Box::new(response))
    }
}

struct FileResponse {
    status: u16,
    final_url: String,
    file: Option<tokio::fs::File>,
    length: Option<u64>,
    last_modified: Option<String>,
    chunk_size: usize,
}

#[async_trait]
impl ResponseStream for FileResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn final_url(&self) -> &str {
        &self.final_url
    }

    fn header(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case("last-modified") {
            self.last_modified.clone()
        } else {
            None
        }
    }

    fn content_length(&self) -> Option<u64> {
        self.length
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let mut buffer = vec![0u8; self.chunk_size];
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| Error::transfer(&self.final_url, e))?;
        if n == 0 {
            self.file = None;
            return Ok(None);
        }
        buffer.truncate(n);
        Ok(Some(buffer))
    }
}

// =============================================================================
// Scheme routing
// =============================================================================

/// Routes requests to a transport by URL scheme
#[derive(Default)]
pub struct SchemeTransport {
    routes: Vec<(String, Arc<dyn Transport>)>,
}

impl SchemeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP(S) through reqwest and `file://` from disk
    pub fn with_defaults(options: &HttpTransportOptions) -> Result<Self> {
        let http: Arc<dyn Transport> = Arc::new(HttpTransport::new(options)?);
        Ok(Self::new()
            .with_route("https", http.clone())
            .with_route("http", http)
            .with_route("file", Arc::new(FileTransport::new())))
    }

    /// Register (or replace) the transport for a scheme
    pub fn with_route(mut self, scheme: &str, transport: Arc<dyn Transport>) -> Self {
        let scheme = scheme.to_ascii_lowercase();
        self.routes.retain(|(s, _)| *s != scheme);
        self.routes.push((scheme, transport));
        self
    }

    fn route(&self, url: &str) -> Option<&Arc<dyn Transport>> {
        let (scheme, _) = url.split_once("://")?;
        let scheme = scheme.to_ascii_lowercase();
        self.routes
            .iter()
            .find(|(s, _)| *s == scheme)
            .map(|(_, transport)| transport)
    }
}

#[async_trait]
impl Transport for SchemeTransport {
    async fn start(&self, request: &TransferRequest) -> Result<Box<dyn ResponseStream>> {
        match self.route(&request.url) {
            Some(transport) => transport.start(request).await,
            None => Err(Error::transfer(&request.url, "unsupported URL scheme")),
        }
    }
}
