use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use claimcompass_tools::openai::DEFAULT_API_URL;

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_url: String,
    /// Analysis is disabled when unset
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_timeout: Duration,

    pub http_port: u16,
    /// Directory holding index.html and the static assets
    pub frontend_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            openai_api_url: std::env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            openai_timeout: Duration::from_secs(
                std::env::var("OPENAI_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("OPENAI_TIMEOUT_SECS must be a number of seconds")?,
            ),

            http_port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("PORT must be a valid port number")?,
            frontend_dir: std::env::var("FRONTEND_DIR")
                .unwrap_or_else(|_| "frontend".to_string())
                .into(),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| (20 * 1024 * 1024).to_string())
                .parse()
                .context("MAX_UPLOAD_BYTES must be a byte count")?,
        })
    }

    pub fn analysis_enabled(&self) -> bool {
        self.openai_api_key.is_some()
    }
}
