//! Damage Analysis
//!
//! Sends a normalized car photo to a vision-capable model with a fixed
//! adjuster prompt and maps the JSON reply onto [`AnalysisResult`].
//!
//! The analyzer is chosen once at startup: [`OpenAiAnalyzer`] when an API key
//! is configured, otherwise [`DisabledAnalyzer`], which answers locally with
//! an explanatory "not configured" result.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use claimcompass_tools::{OpenAiClient, VisionRequest};

use crate::config::Config;

pub const UNKNOWN: &str = "Unknown";

const SYSTEM_PROMPT: &str = r#"You are an expert automotive insurance adjuster with extensive experience identifying vehicles. Analyze the car in this image carefully.

VEHICLE IDENTIFICATION: use every visual clue available to determine make, model and color:
- Brand badges, emblems and logos (grille, trunk lid, doors, steering wheel)
- Headlight, taillight and grille shapes
- Body panel lines, door handles and mirror designs
- Wheel and rim patterns
- Model-specific styling details
- Paint color and finish

Respond ONLY with valid JSON in exactly this shape:
{
  "make": "Manufacturer (check badges and logos before answering Unknown)",
  "model": "Specific model name (identify from body design)",
  "color": "The visible paint color",
  "damage_summary": "Professional description of all visible damage",
  "repair_cost_estimate": "Repair cost range in USD based on severity and parts needed"
}

Answer "Unknown" for make, model or color only when it genuinely cannot be identified; most vehicles show enough features to identify them. Base the repair estimate on the visible damage, accounting for paint work, panel replacement and labor."#;

const USER_PROMPT: &str = "Analyze this vehicle image. First identify the make, model and color by examining badges, logos, design features and paint. Then assess any damage. Give your complete assessment in the required JSON format.";

const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("AI analysis failed: {0}")]
    Upstream(String),
    #[error("Failed to parse AI response: {0}")]
    ResponseParse(String),
}

/// The assessment returned to the client for every analyze request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub make: String,
    pub model: String,
    pub color: String,
    pub damage_summary: String,
    pub repair_cost_estimate: String,
    pub success: bool,
    pub error: Option<String>,
}

impl AnalysisResult {
    /// Result for a deployment without model credentials.
    pub fn unconfigured(capability: &str, env_var: &str) -> Self {
        Self {
            make: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
            color: UNKNOWN.to_string(),
            damage_summary: format!(
                "{} not configured. Please set {} environment variable.",
                capability, env_var
            ),
            repair_cost_estimate: "Unable to estimate without API key".to_string(),
            success: false,
            error: Some(format!("{} not configured", capability)),
        }
    }

    /// Soft-degraded result for a request that failed after validation.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            make: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
            color: UNKNOWN.to_string(),
            damage_summary: "Analysis failed".to_string(),
            repair_cost_estimate: "Unable to estimate".to_string(),
            success: false,
            error: Some(message.into()),
        }
    }

    /// Parse the model's JSON reply, defaulting any missing field.
    pub fn from_reply(content: &str) -> Result<Self, AnalysisError> {
        if content.trim().is_empty() {
            return Err(AnalysisError::ResponseParse("empty response".to_string()));
        }

        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| AnalysisError::ResponseParse(e.to_string()))?;
        let fields = value.as_object().ok_or_else(|| {
            AnalysisError::ResponseParse("expected a JSON object".to_string())
        })?;

        let field = |key: &str, default: &str| -> String {
            match fields.get(key) {
                None | Some(serde_json::Value::Null) => default.to_string(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }
        };

        Ok(Self {
            make: field("make", UNKNOWN),
            model: field("model", UNKNOWN),
            color: field("color", UNKNOWN),
            damage_summary: field("damage_summary", "Unable to assess damage"),
            repair_cost_estimate: field("repair_cost_estimate", "Unable to estimate"),
            success: true,
            error: None,
        })
    }
}

/// Something that can turn a base64 JPEG into a damage assessment.
#[async_trait]
pub trait DamageAnalyzer: Send + Sync {
    /// Human-readable backend name, for logs
    fn name(&self) -> &str;

    async fn analyze(&self, base64_jpeg: &str) -> Result<AnalysisResult, AnalysisError>;
}

/// Stand-in used when no model credentials are configured.
pub struct DisabledAnalyzer {
    capability: String,
    env_var: String,
}

impl DisabledAnalyzer {
    pub fn new(capability: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            env_var: env_var.into(),
        }
    }

    pub fn openai() -> Self {
        Self::new("OpenAI API key", "OPENAI_API_KEY")
    }
}

#[async_trait]
impl DamageAnalyzer for DisabledAnalyzer {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn analyze(&self, _base64_jpeg: &str) -> Result<AnalysisResult, AnalysisError> {
        Ok(AnalysisResult::unconfigured(&self.capability, &self.env_var))
    }
}

/// Analyzer backed by an OpenAI-compatible vision model.
pub struct OpenAiAnalyzer {
    client: OpenAiClient,
}

impl OpenAiAnalyzer {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DamageAnalyzer for OpenAiAnalyzer {
    fn name(&self) -> &str {
        self.client.model()
    }

    async fn analyze(&self, base64_jpeg: &str) -> Result<AnalysisResult, AnalysisError> {
        let data_url = format!("data:image/jpeg;base64,{}", base64_jpeg);

        info!(
            "Analyzing image ({} base64 chars) with model {}",
            base64_jpeg.len(),
            self.client.model()
        );

        let request = VisionRequest {
            system_prompt: SYSTEM_PROMPT,
            user_prompt: USER_PROMPT,
            image_url: &data_url,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            json_response: true,
        };

        let content = self
            .client
            .complete_vision(&request)
            .await
            .map_err(|e| AnalysisError::Upstream(e.to_string()))?;

        let result = AnalysisResult::from_reply(content.as_deref().unwrap_or_default())?;
        info!(
            "Analysis complete: {} {} ({})",
            result.make, result.model, result.color
        );

        Ok(result)
    }
}

/// Choose the analyzer for this process from configuration.
pub fn analyzer_from_config(config: &Config) -> anyhow::Result<Arc<dyn DamageAnalyzer>> {
    match &config.openai_api_key {
        Some(api_key) => {
            let client = OpenAiClient::with_timeout(
                &config.openai_api_url,
                api_key,
                &config.openai_model,
                config.openai_timeout,
            )?;
            Ok(Arc::new(OpenAiAnalyzer::new(client)))
        }
        None => {
            warn!("OPENAI_API_KEY not set - analysis features will be disabled");
            Ok(Arc::new(DisabledAnalyzer::openai()))
        }
    }
}
