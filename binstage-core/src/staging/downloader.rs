//! Content fetching with SHA-256 verification.
//!
//! [`Transport`] is the network seam: [`HttpTransport`] streams bodies with
//! reqwest, tests substitute in-memory transports. [`ContentFetcher`] sits on
//! top of it and owns the download directory and integrity checks.

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use super::types::Sha256Digest;
use crate::error::{IoContext, Result, StageError};

const USER_AGENT: &str = concat!("binstage/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// URL Validation
// ============================================================================

/// Validates that a URL can be fetched.
///
/// Checks:
/// - URL scheme must be HTTP or HTTPS
/// - URL must have a host
fn validate_url(url_str: &str) -> Result<()> {
    let url = Url::parse(url_str).map_err(|e| StageError::fetch(url_str, format!("invalid URL: {}", e)))?;

    if !matches!(url.scheme(), "https" | "http") {
        return Err(StageError::fetch(url_str, "URL must use HTTP or HTTPS"));
    }

    if url.host_str().is_none() {
        return Err(StageError::fetch(url_str, "URL must have a host"));
    }

    Ok(())
}

// ============================================================================
// Transport
// ============================================================================

/// Network access used by the fetcher.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches the whole body of `url`.
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Streams the body of `url` into `dest`, returning the bytes written.
    async fn get_to_file(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with an optional per-request timeout.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| StageError::fetch("<client>", format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        validate_url(url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StageError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StageError::fetch(
                url,
                format!(
                    "status {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown error")
                ),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(url).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| StageError::fetch(url, e))?;
        Ok(body.to_vec())
    }

    async fn get_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self.send(url).await?;
        debug!("Content-Length: {:?}", response.content_length());

        let mut file = tokio::fs::File::create(dest).await.at(dest)?;
        let mut stream = response.bytes_stream();
        let mut bytes_downloaded: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| StageError::fetch(url, e))?;
            file.write_all(&chunk).await.at(dest)?;
            bytes_downloaded += chunk.len() as u64;
        }

        file.flush().await.at(dest)?;
        Ok(bytes_downloaded)
    }
}

// ============================================================================
// Content Fetcher
// ============================================================================

/// Downloads into a scratch directory and verifies digests.
#[derive(Clone)]
pub struct ContentFetcher {
    transport: Arc<dyn Transport>,
    download_dir: PathBuf,
}

impl std::fmt::Debug for ContentFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentFetcher")
            .field("download_dir", &self.download_dir)
            .finish_non_exhaustive()
    }
}

impl ContentFetcher {
    pub fn new(transport: Arc<dyn Transport>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            download_dir: download_dir.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Fetches the text content of a URL.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let bytes = self.transport.get_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Fetches the raw content of a URL.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.transport.get_bytes(url).await
    }

    /// Downloads `url` to `<download_dir>/<file_name>`.
    ///
    /// When `expected` is given the file is hashed after download; on mismatch
    /// it is deleted and [`StageError::ChecksumMismatch`] is returned.
    pub async fn download(
        &self,
        url: &str,
        file_name: &str,
        expected: Option<&Sha256Digest>,
    ) -> Result<PathBuf> {
        let dest = self.download_dir.join(file_name);
        info!("Downloading {} to {}", url, dest.display());

        std::fs::create_dir_all(&self.download_dir).at(&self.download_dir)?;

        if let Err(e) = self.transport.get_to_file(url, &dest).await {
            remove_quietly(&dest);
            return Err(e);
        }

        if let Some(expected) = expected {
            debug!("Verifying checksum ({})", expected);
            let actual = sha256_file(&dest)?;
            if !expected.matches(&actual) {
                remove_quietly(&dest);
                return Err(StageError::ChecksumMismatch {
                    file: file_name.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
            debug!("Checksum OK: {}", actual);
        }

        Ok(dest)
    }
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

// ============================================================================
// Hashing
// ============================================================================

/// Computes the lowercase hex SHA-256 of a file, streaming its content.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).at(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buffer).at(path)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format_sha256_hex(&hasher.finalize()))
}

/// Computes the lowercase hex SHA-256 of a byte slice.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    format_sha256_hex(&Sha256::digest(bytes))
}

/// Formats a SHA256 hash as lowercase hex without using the hex crate.
fn format_sha256_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport shared by the staging and completion tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies and records every requested URL.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryTransport {
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        requests: Mutex<Vec<String>>,
    }

    impl MemoryTransport {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.into());
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn request_count(&self, url: &str) -> usize {
            self.requests().iter().filter(|u| *u == url).count()
        }

        fn lookup(&self, url: &str) -> Result<Vec<u8>> {
            self.requests.lock().unwrap().push(url.to_string());
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| StageError::fetch(url, "status 404: Not Found"))
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
            self.lookup(url)
        }

        async fn get_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
            let body = self.lookup(url)?;
            std::fs::write(dest, &body).at(dest)?;
            Ok(body.len() as u64)
        }
    }
}
