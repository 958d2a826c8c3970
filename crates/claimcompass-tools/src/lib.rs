//! ClaimCompass Tools - clients for the external capabilities the service uses
//!
//! Tools are organized by category:
//! - openai: OpenAI-compatible chat completions client (vision requests)
//! - fetch: Remote image downloader

pub mod fetch;
pub mod openai;

pub use fetch::{FetchError, FetchedImage, ImageFetcher};
pub use openai::{OpenAiClient, OpenAiError, VisionRequest};
