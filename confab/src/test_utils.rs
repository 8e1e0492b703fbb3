//! Shared helpers for tests: a test app over the real router and wiremock
//! stand-ins for the upstream Gemini API.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::json;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::chat::session::SessionStore;
use crate::gemini::GeminiClient;
use crate::{AppState, Config, build_router};

/// Config pointed at a mocked upstream. The uploads directory is replaced
/// with a fresh tempdir by [`create_test_app`].
pub fn test_config(gemini_base: &str) -> Config {
    let mut config = Config::default();
    config.gemini.api_key = Some("test-key".to_string());
    config.gemini.base_url = Url::parse(gemini_base).expect("valid mock server URL");
    config
}

/// Build a test server over the real router. Returns the uploads tempdir so
/// tests can assert on staged-file cleanup (and so it outlives the server).
pub async fn create_test_app(mut config: Config) -> (TestServer, TempDir) {
    let uploads = TempDir::new().expect("Failed to create uploads tempdir");
    config.uploads.dir = uploads.path().to_path_buf();

    let state = AppState::builder()
        .config(config.clone())
        .sessions(Arc::new(SessionStore::new()))
        .gemini(Arc::new(GeminiClient::from_config(&config.gemini).expect("valid gemini config")))
        .build();

    let router = build_router(&state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");

    (server, uploads)
}

/// Mount a generateContent mock that always replies with `text`.
pub async fn mock_gemini_reply(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash-001:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }]
        })))
        .mount(server)
        .await;
}

/// Mount a generateContent mock that fails with a Gemini-style error payload.
pub async fn mock_gemini_error(server: &MockServer, status: u16, message: &str) {
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash-001:generateContent"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "error": {"code": status, "message": message}
        })))
        .mount(server)
        .await;
}
