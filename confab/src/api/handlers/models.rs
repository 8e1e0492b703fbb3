//! HTTP handler for upstream model discovery.

use axum::{Json, extract::State};
use tracing::instrument;

use crate::AppState;
use crate::api::models::ModelsResponse;
use crate::errors::{Error, Result};

#[utoipa::path(
    get,
    path = "/models",
    tag = "models",
    summary = "List available models",
    description = "List upstream models that support content generation, names stripped of the \
        `models/` prefix.",
    responses(
        (status = 200, description = "Available models", body = ModelsResponse),
        (status = 500, description = "Upstream failure", body = crate::api::models::ErrorResponse),
    )
)]
#[instrument(skip_all)]
pub async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>> {
    let models = state.gemini.list_models().await.map_err(Error::Upstream)?;
    Ok(Json(ModelsResponse { models }))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{create_test_app, test_config};
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_models_proxies_chat_capable_models() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    {
                        "name": "models/gemini-1.5-flash-001",
                        "displayName": "Gemini 1.5 Flash",
                        "supportedGenerationMethods": ["generateContent"]
                    },
                    {
                        "name": "models/text-embedding-004",
                        "supportedGenerationMethods": ["embedContent"]
                    }
                ]
            })))
            .mount(&mock_server)
            .await;
        let (server, _uploads) = create_test_app(test_config(&mock_server.uri())).await;

        let response = server.get("/models").await;

        response.assert_status(StatusCode::OK);
        let body: Value = response.json();
        let models = body["models"].as_array().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0]["name"], "gemini-1.5-flash-001");
    }

    #[tokio::test]
    async fn test_list_models_upstream_error_is_500() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"message": "API key not valid"}
            })))
            .mount(&mock_server)
            .await;
        let (server, _uploads) = create_test_app(test_config(&mock_server.uri())).await;

        let response = server.get("/models").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert!(body["error"].as_str().unwrap().contains("API key not valid"));
    }
}
