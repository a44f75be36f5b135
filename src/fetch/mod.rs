//! The retrieval port: turns a feed URL plus prior caching tokens into a
//! raw document (or a "not modified" report).
//!
//! Two backends, picked by URL shape:
//!
//! - [`http`]: conditional HTTP GET with ETag/Last-Modified tokens
//! - [`file`]: `file://` URLs and bare paths, restricted to a configured
//!   root directory
//!
//! All configuration is passed into the constructor; there is no global
//! handler registry.

mod file;
mod http;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Errors that can occur while retrieving a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("response too large")]
    ResponseTooLarge,
    /// URL scheme this retriever does not handle
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    /// Local file retrieval attempted without a configured feed root
    #[error("local file access is disabled (no feed root configured)")]
    LocalFilesDisabled,
    /// Local path resolves outside the configured feed root
    #[error("path is outside the feed root: {0}")]
    PathOutsideRoot(String),
    /// Local path contains an OS-reserved name (CON, NUL, COM1, ...)
    #[error("path must not be reserved: {0}")]
    ReservedPath(String),
    /// Local file could not be read
    #[error("failed to read feed file: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a retrieval.
#[derive(Debug)]
pub enum Retrieved {
    /// The remote reported no change since the tokens we sent (HTTP 304).
    NotModified,
    /// A document, with the caching tokens to store for the next fetch.
    Document {
        bytes: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

/// Retrieval settings, passed into [`Fetcher::new`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Directory local feed files must live under. `None` disables local
    /// file retrieval entirely.
    pub feed_root: Option<PathBuf>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum response body size in bytes.
    pub max_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            feed_root: None,
            timeout: Duration::from_secs(30),
            max_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Retrieves feed documents over HTTP(S) or from the local filesystem.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    /// Fetches `url`, sending the prior caching tokens so an unchanged
    /// remote can answer with 304 instead of the full document.
    ///
    /// # Errors
    ///
    /// - [`FetchError::HttpStatus`] / [`FetchError::Network`] /
    ///   [`FetchError::Timeout`] / [`FetchError::ResponseTooLarge`] for
    ///   HTTP retrievals
    /// - [`FetchError::LocalFilesDisabled`] /
    ///   [`FetchError::PathOutsideRoot`] / [`FetchError::ReservedPath`] /
    ///   [`FetchError::Io`] for local files
    /// - [`FetchError::UnsupportedScheme`] for anything else
    pub async fn retrieve(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<Retrieved, FetchError> {
        match Url::parse(url) {
            Ok(parsed) => match parsed.scheme() {
                "http" | "https" => {
                    http::retrieve(&self.client, &self.config, url, etag, last_modified).await
                }
                "file" => file::retrieve(&self.config, url).await,
                scheme => Err(FetchError::UnsupportedScheme(scheme.to_owned())),
            },
            // Not an absolute URL: treat it as a bare filesystem path.
            Err(_) => file::retrieve(&self.config, url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_scheme_rejected() {
        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher.retrieve("ftp://example.com/feed", None, None).await;
        assert!(matches!(err, Err(FetchError::UnsupportedScheme(s)) if s == "ftp"));
    }

    #[tokio::test]
    async fn test_local_files_disabled_without_root() {
        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher.retrieve("feeds/one.xml", None, None).await;
        assert!(matches!(err, Err(FetchError::LocalFilesDisabled)));
    }
}
