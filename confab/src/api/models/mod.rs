//! API request and response data models.
//!
//! These structures define the public API contract and are annotated with
//! `utoipa` for automatic API docs. The conversation types they embed live in
//! [`crate::chat`]; this module only adds the envelopes.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::chat::Turn;
use crate::gemini::ModelInfo;

/// Successful `/chat` response: the model's reply plus the full updated history.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    /// The model's text reply to this submission
    pub reply: String,
    /// The session's complete conversation history after this exchange
    pub history: Vec<Turn>,
}

/// `/history` response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub history: Vec<Turn>,
}

/// `/reset` acknowledgement.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetResponse {
    pub message: String,
}

/// `/models` response: upstream models that support content generation.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

/// Error body returned for every failed request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
