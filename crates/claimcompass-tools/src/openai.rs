//! OpenAI-compatible chat completions client
//!
//! Only the slice of the API the service needs: a single-turn vision request
//! (system prompt, user text, one inline image) returning the text content of
//! the first choice.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum OpenAiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
}

/// A single-turn vision prompt.
#[derive(Debug, Clone)]
pub struct VisionRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    /// Image as a `data:` URI or a fetchable URL.
    pub image_url: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Constrain the reply to a JSON object (`response_format: json_object`).
    pub json_response: bool,
}

impl VisionRequest<'_> {
    fn to_body(&self, model: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": self.user_prompt },
                        { "type": "image_url", "image_url": { "url": self.image_url } }
                    ]
                }
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        if self.json_response {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        body
    }
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_url: Arc<String>,
    api_key: Arc<String>,
    model: Arc<String>,
}

impl OpenAiClient {
    pub fn new(api_url: &str, api_key: &str, model: &str) -> Result<Self, OpenAiError> {
        Self::with_timeout(api_url, api_key, model, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        api_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, OpenAiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ClaimCompass/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: Arc::new(api_url.trim_end_matches('/').to_string()),
            api_key: Arc::new(api_key.to_string()),
            model: Arc::new(model.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a vision request and return the first choice's message content.
    ///
    /// `Ok(None)` means the API answered successfully but with no content.
    pub async fn complete_vision(
        &self,
        request: &VisionRequest<'_>,
    ) -> Result<Option<String>, OpenAiError> {
        let url = format!("{}/chat/completions", self.api_url);
        debug!("Vision API request to {} (model {})", url, self.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.as_str())
            .json(&request.to_body(&self.model))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Vision API error {}: {}", status, error_text);
            return Err(OpenAiError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string);

        debug!(
            "Vision API replied ({} chars)",
            content.as_deref().map_or(0, str::len)
        );

        Ok(content)
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use tokio::sync::Mutex;

    type Captured = Arc<Mutex<Option<serde_json::Value>>>;

    async fn spawn_upstream(status: StatusCode, reply: serde_json::Value) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(
                    move |State(captured): State<Captured>, Json(body): Json<serde_json::Value>| {
                        let reply = reply.clone();
                        async move {
                            *captured.lock().await = Some(body);
                            (status, Json(reply))
                        }
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/v1", addr), captured)
    }

    fn request() -> VisionRequest<'static> {
        VisionRequest {
            system_prompt: "system",
            user_prompt: "user",
            image_url: "data:image/jpeg;base64,AAAA",
            max_tokens: 1000,
            temperature: 0.1,
            json_response: true,
        }
    }

    #[test]
    fn test_body_shape() {
        let body = request().to_body("gpt-4o");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,AAAA"
        );
    }

    #[test]
    fn test_body_without_json_mode() {
        let mut req = request();
        req.json_response = false;
        assert!(req.to_body("m").get("response_format").is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = OpenAiClient::new("http://localhost", "sk-secret", "gpt-4o").unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-secret"));
    }

    #[tokio::test]
    async fn test_complete_vision_returns_content() {
        let reply = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"make\":\"Honda\"}" } }]
        });
        let (url, captured) = spawn_upstream(StatusCode::OK, reply).await;

        let client = OpenAiClient::new(&url, "sk-test", "gpt-4o").unwrap();
        let content = client.complete_vision(&request()).await.unwrap();
        assert_eq!(content.as_deref(), Some("{\"make\":\"Honda\"}"));

        let body = captured.lock().await.clone().unwrap();
        assert_eq!(body["model"], "gpt-4o");
    }

    #[tokio::test]
    async fn test_complete_vision_missing_content() {
        let reply = serde_json::json!({ "choices": [{ "message": { "content": null } }] });
        let (url, _) = spawn_upstream(StatusCode::OK, reply).await;

        let client = OpenAiClient::new(&url, "sk-test", "gpt-4o").unwrap();
        assert!(client.complete_vision(&request()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_vision_api_error() {
        let reply = serde_json::json!({ "error": { "message": "quota exceeded" } });
        let (url, _) = spawn_upstream(StatusCode::TOO_MANY_REQUESTS, reply).await;

        let client = OpenAiClient::new(&url, "sk-test", "gpt-4o").unwrap();
        match client.complete_vision(&request()).await {
            Err(OpenAiError::Api { status, message }) => {
                assert_eq!(status, 429);
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }
}
