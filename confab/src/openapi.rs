//! OpenAPI documentation configuration.

use utoipa::OpenApi;

use crate::api::models::{ChatResponse, ErrorResponse, HistoryResponse, ModelsResponse, ResetResponse};
use crate::chat::{Fragment, InlineData, Role, Turn, TurnStatus};
use crate::gemini::ModelInfo;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Confab API",
        description = "A minimal chat proxy over the Gemini generative-language API. Submit text \
            and/or file attachments; the accumulated conversation is forwarded upstream and the \
            reply returned alongside the full history."
    ),
    paths(
        crate::api::handlers::chat::submit_message,
        crate::api::handlers::chat::get_history,
        crate::api::handlers::chat::reset_chat,
        crate::api::handlers::models::list_models,
    ),
    components(schemas(
        ChatResponse,
        HistoryResponse,
        ResetResponse,
        ModelsResponse,
        ErrorResponse,
        Turn,
        TurnStatus,
        Fragment,
        InlineData,
        Role,
        ModelInfo,
    )),
    tags(
        (name = "chat", description = "Conversation submission and lifecycle"),
        (name = "models", description = "Upstream model discovery"),
    )
)]
pub struct ApiDoc;
