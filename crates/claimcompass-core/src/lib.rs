//! ClaimCompass Core Library
//!
//! Car damage assessment service: image ingestion, vision-model analysis and
//! the HTTP surface tying them together.

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod server;

// Re-export key types for convenience
pub use analysis::{AnalysisResult, DamageAnalyzer, DisabledAnalyzer, OpenAiAnalyzer};
pub use config::Config;
pub use server::{router, AppState};
