//! Client for the Google generative-language (Gemini) API.
//!
//! The API is treated as an opaque collaborator: an ordered sequence of content
//! fragments goes in, a single text completion comes out. This module owns the
//! wire format (camelCase JSON, `x-goog-api-key` header) so the rest of the
//! crate only deals in domain [`Fragment`]s.
//!
//! Two endpoints are used:
//!
//! - `POST {base_url}/models/{model}:generateContent` for completions
//! - `GET {base_url}/models` for model discovery

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use url::Url;
use utoipa::ToSchema;

use crate::chat::Fragment;
use crate::config::GeminiConfig;

/// Errors from the upstream generative-language API.
///
/// All variants surface as HTTP 500 to the caller; no retry is performed.
#[derive(ThisError, Debug)]
pub enum GeminiError {
    /// Network-level failure talking to the API
    #[error("Request to Gemini API failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API returned a non-2xx status with an error payload
    #[error("Gemini API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    /// The API returned 2xx but the body wasn't usable
    #[error("Malformed Gemini API response: {0}")]
    MalformedResponse(String),
}

/// A model listed by the upstream API that supports content generation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelInfo {
    /// Model name with the `models/` prefix stripped (e.g., `gemini-1.5-flash-001`)
    pub name: String,
    /// Human-readable model name
    pub display_name: Option<String>,
    /// Short description of the model
    pub description: Option<String>,
}

// Wire types. The REST API speaks camelCase JSON; domain types stay snake_case.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
    system_instruction: WireContent,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: WireInlineData,
    },
    // Response parts we don't consume (function calls etc.) must not break parsing
    Unknown(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

impl From<&Fragment> for WirePart {
    fn from(fragment: &Fragment) -> Self {
        match fragment {
            Fragment::Text { text } => WirePart::Text { text: text.clone() },
            Fragment::InlineData { inline_data } => WirePart::InlineData {
                inline_data: WireInlineData {
                    mime_type: inline_data.mime_type.clone(),
                    data: inline_data.data.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ListedModel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedModel {
    name: String,
    display_name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

/// HTTP client for the generative-language API.
///
/// Cheap to clone; holds a `reqwest::Client` internally.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    model: String,
    system_instruction: String,
}

impl GeminiClient {
    /// Build a client from configuration. Fails if the API key is absent,
    /// though [`Config::validate`](crate::Config::validate) should have
    /// caught that already.
    pub fn from_config(config: &GeminiConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Gemini API key is not configured"))?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
            system_instruction: config.system_instruction.clone(),
        })
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), suffix)
    }

    /// Forward an ordered fragment sequence to the model and return its text reply.
    ///
    /// The fragments are wrapped as a single user-role content, matching how the
    /// upstream SDK submits a flat prompt-parts array. Blocking round-trip from
    /// the caller's perspective; no timeout beyond the transport default.
    #[tracing::instrument(skip_all, fields(model = %self.model, parts = parts.len()))]
    pub async fn generate_content(&self, parts: &[Fragment]) -> Result<String, GeminiError> {
        let request = GenerateContentRequest {
            contents: vec![WireContent {
                role: Some("user".to_string()),
                parts: parts.iter().map(WirePart::from).collect(),
            }],
            system_instruction: WireContent {
                role: None,
                parts: vec![WirePart::Text {
                    text: self.system_instruction.clone(),
                }],
            },
        };

        let url = self.endpoint(&format!("models/{}:generateContent", self.model));
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeminiError::Api {
                status,
                message: extract_api_error(response).await,
            });
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GeminiError::MalformedResponse(e.to_string()))?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| match part {
                        WirePart::Text { text } => Some(text),
                        _ => None,
                    })
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GeminiError::MalformedResponse(
                "response contained no text candidates".to_string(),
            ));
        }

        Ok(text)
    }

    /// List upstream models that support `generateContent`.
    ///
    /// Names are returned with the `models/` prefix stripped, the way users
    /// would write them in the config file.
    #[tracing::instrument(skip_all)]
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, GeminiError> {
        let url = self.endpoint("models");
        let response = self.http.get(&url).header("x-goog-api-key", &self.api_key).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeminiError::Api {
                status,
                message: extract_api_error(response).await,
            });
        }

        let body: ListModelsResponse = response
            .json()
            .await
            .map_err(|e| GeminiError::MalformedResponse(e.to_string()))?;

        Ok(body
            .models
            .into_iter()
            .filter(|model| model.supported_generation_methods.iter().any(|m| m == "generateContent"))
            .map(|model| ModelInfo {
                name: model.name.trim_start_matches("models/").to_string(),
                display_name: model.display_name,
                description: model.description,
            })
            .collect())
    }
}

/// Pull the `error.message` field out of an upstream error payload, falling
/// back to the raw body (or the status line) when it isn't parseable.
async fn extract_api_error(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => match serde_json::from_str::<ApiErrorEnvelope>(&body) {
            Ok(ApiErrorEnvelope { error: Some(e) }) => e.message,
            _ if !body.is_empty() => body,
            _ => format!("HTTP {status}"),
        },
        Err(_) => format!("HTTP {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base: &str) -> GeminiClient {
        let config = GeminiConfig {
            api_key: Some("test-key".to_string()),
            base_url: Url::parse(base).unwrap(),
            model: "gemini-1.5-flash-001".to_string(),
            system_instruction: "Be brief.".to_string(),
        };
        GeminiClient::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_generate_content_extracts_reply_text() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash-001:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{"text": "Hello, "}, {"text": "world!"}]
                    },
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let reply = client.generate_content(&[Fragment::text("Hi")]).await.unwrap();

        // Multiple text parts are concatenated
        assert_eq!(reply, "Hello, world!");
    }

    #[tokio::test]
    async fn test_generate_content_sends_system_instruction_and_parts() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"text": "What is this?"},
                        {"inlineData": {"mimeType": "image/png", "data": "aGVsbG8="}}
                    ]
                }],
                "systemInstruction": {"parts": [{"text": "Be brief."}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "A test."}]}}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let parts = vec![
            Fragment::text("What is this?"),
            Fragment::inline_data("image/png", "aGVsbG8="),
        ];
        let reply = client.generate_content(&parts).await.unwrap();
        assert_eq!(reply, "A test.");
    }

    #[tokio::test]
    async fn test_generate_content_surfaces_api_error_message() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "code": 429,
                    "message": "Resource has been exhausted",
                    "status": "RESOURCE_EXHAUSTED"
                }
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let err = client.generate_content(&[Fragment::text("Hi")]).await.unwrap_err();

        match err {
            GeminiError::Api { status, message } => {
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(message, "Resource has been exhausted");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_content_rejects_empty_candidates() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let err = client.generate_content(&[Fragment::text("Hi")]).await.unwrap_err();

        assert!(matches!(err, GeminiError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_list_models_filters_and_strips_prefix() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    {
                        "name": "models/gemini-1.5-flash-001",
                        "displayName": "Gemini 1.5 Flash",
                        "description": "Fast and versatile",
                        "supportedGenerationMethods": ["generateContent", "countTokens"]
                    },
                    {
                        "name": "models/text-embedding-004",
                        "displayName": "Text Embedding",
                        "supportedGenerationMethods": ["embedContent"]
                    }
                ]
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let models = client.list_models().await.unwrap();

        // Only chat-capable models survive the filter
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "gemini-1.5-flash-001");
        assert_eq!(models[0].display_name.as_deref(), Some("Gemini 1.5 Flash"));
    }
}
