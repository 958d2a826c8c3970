//! Remote image downloader
//!
//! Fetches an image over HTTP the way a browser would, with a short fixed
//! timeout and a size cap, and refuses anything the server does not label as
//! an image.

use std::time::Duration;
use tracing::{debug, info};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BYTES: usize = 20 * 1024 * 1024;

/// Some image hosts refuse requests without a browser user agent.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
    #[error("URL does not point to an image")]
    NotAnImage { content_type: String },
    #[error("image is larger than {limit} bytes")]
    TooLarge { limit: usize },
}

/// A downloaded image and the content type its server declared.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_limits(FETCH_TIMEOUT, DEFAULT_MAX_BYTES)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_limits(timeout, DEFAULT_MAX_BYTES)
    }

    pub fn with_limits(timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()?;

        Ok(Self { client, max_bytes })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Download `url`, failing on non-2xx status, a non-`image/*` content
    /// type, or a body over `max_bytes`.
    pub async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        debug!("Fetching image from {}", url);

        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !content_type
            .trim()
            .to_ascii_lowercase()
            .starts_with("image/")
        {
            return Err(FetchError::NotAnImage { content_type });
        }

        let limit = self.max_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(FetchError::TooLarge { limit });
        }

        // Content-Length can be missing or understated
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        info!("Fetched image ({}, {} bytes)", content_type, bytes.len());

        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}
