//! Gemini-backed image labeller.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::BoxFuture;

use super::{LabelGenerator, MAX_LABELS, parse_labels};

const LABEL_PROMPT: &str = "List 15 short tags for this image in Traditional Chinese. \
Reply only with the words separated by commas, with no preamble, numbering or extra explanation.";

/// Gemini labeller settings.
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    /// API root, e.g. `https://generativelanguage.googleapis.com`.
    pub base_url: String,
    pub timeout: Duration,
    pub max_labels: usize,
}

impl GeminiConfig {
    pub const DEFAULT_MODEL: &'static str = "gemini-2.5-flash";
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: Self::DEFAULT_MODEL.to_string(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_labels: MAX_LABELS,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_labels", &self.max_labels)
            .finish_non_exhaustive()
    }
}

/// Asks Gemini for tags describing an image.
#[derive(Debug, Clone)]
pub struct GeminiLabeler {
    config: GeminiConfig,
    http_client: reqwest::Client,
}

impl GeminiLabeler {
    pub fn new(config: GeminiConfig) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to create HTTP client: {}", e))
            })?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Requests labels, reporting failures as errors.
    pub async fn request_labels(&self, image: &[u8], mime_type: &str) -> ProviderResult<Vec<String>> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(image) } },
                    { "text": LABEL_PROMPT }
                ]
            }]
        });

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(e).with_provider("gemini"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                ProviderError::server(format!("generateContent failed ({}): {}", status, body))
                    .with_provider("gemini"),
            );
        }

        let reply: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::invalid_response(format!("invalid generateContent reply: {}", e))
                .with_provider("gemini")
        })?;

        let labels = parse_labels(&reply.text(), self.config.max_labels);
        debug!(count = labels.len(), "generated labels");
        Ok(labels)
    }
}

impl LabelGenerator for GeminiLabeler {
    fn generate<'a>(&'a self, image: &'a [u8], mime_type: &'a str) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            match self.request_labels(image, mime_type).await {
                Ok(labels) => labels,
                Err(e) => {
                    warn!(error = %e, "label generation failed");
                    Vec::new()
                }
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts joined.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn labeler_for(server: &MockServer) -> GeminiLabeler {
        GeminiLabeler::new(
            GeminiConfig::new("test-key")
                .with_base_url(server.base_url())
                .with_timeout(Duration::from_secs(2)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn labels_from_reply() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.5-flash:generateContent")
                    .header("x-goog-api-key", "test-key")
                    .body_contains("\"mime_type\":\"image/png\"")
                    .body_contains(STANDARD.encode(b"PNGDATA"));
                then.status(200).json_body(serde_json::json!({
                    "candidates": [{
                        "content": { "parts": [{ "text": "貓, 沙發，室內\n寵物" }] }
                    }]
                }));
            })
            .await;

        let labels = labeler_for(&server).generate(b"PNGDATA", "image/png").await;
        assert_eq!(labels, vec!["貓", "沙發", "室內", "寵物"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failure_yields_empty_list() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(500).body("overloaded");
            })
            .await;

        let labeler = labeler_for(&server);
        assert!(labeler.request_labels(b"x", "image/jpeg").await.is_err());
        assert!(labeler.generate(b"x", "image/jpeg").await.is_empty());
    }

    #[tokio::test]
    async fn empty_candidates_yield_no_labels() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(serde_json::json!({ "candidates": [] }));
            })
            .await;

        assert!(labeler_for(&server).generate(b"x", "image/jpeg").await.is_empty());
    }

    #[test]
    fn debug_hides_api_key() {
        let debug = format!("{:?}", GeminiConfig::new("secret-key"));
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("gemini-2.5-flash"));
    }
}
