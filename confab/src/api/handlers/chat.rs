//! HTTP handlers for the conversation proxy: submit, history, reset.
//!
//! `submit` is the heart of the service. The commit discipline deliberately
//! keeps user turns in history even when the upstream call fails (they are
//! tagged [`TurnStatus::Failed`](crate::chat::TurnStatus) instead of rolled
//! back), so a later successful submit still carries the stranded context.

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info, instrument};

use crate::AppState;
use crate::api::models::{ChatResponse, HistoryResponse, ResetResponse};
use crate::chat::{Fragment, staging::StagedFile};
use crate::errors::{Error, Result};
use crate::types::{SessionId, abbrev_uuid};

/// Header clients use to select their session. Absent header means the shared
/// nil session, which keeps header-less clients on a single process-wide history.
pub const SESSION_HEADER: &str = "x-confab-session";

fn session_id(headers: &HeaderMap) -> Result<SessionId> {
    let Some(value) = headers.get(SESSION_HEADER) else {
        return Ok(SessionId::nil());
    };
    value
        .to_str()
        .ok()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| Error::BadRequest {
            message: format!("Invalid {SESSION_HEADER} header: expected a UUID"),
        })
}

/// Parsed `/chat` submission: optional text, optional staged attachment.
struct Submission {
    message: Option<String>,
    staged: Option<StagedFile>,
}

/// A body-limit overrun surfaces from the multipart reader as a 413-status
/// error; everything else is a malformed request.
fn multipart_error(e: MultipartError, operation: &str) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: "Request body exceeds the maximum allowed upload size".to_string(),
        }
    } else {
        Error::BadRequest {
            message: format!("Failed to {operation}: {e}"),
        }
    }
}

/// Pull `message` and `file` out of the multipart body. The file part is
/// staged to disk immediately; empty text counts as absent (HTML forms post
/// `message=""` when the field is left blank).
async fn parse_submission(state: &AppState, mut multipart: Multipart) -> Result<Submission> {
    let mut message: Option<String> = None;
    let mut staged: Option<StagedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "parse multipart data"))?
    {
        match field.name().unwrap_or("") {
            "message" => {
                let text = field.text().await.map_err(|e| multipart_error(e, "read message field"))?;
                if !text.is_empty() {
                    message = Some(text);
                }
            }
            "file" => {
                let filename = field
                    .file_name()
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| "upload".to_string());
                let mime_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());

                let data = field.bytes().await.map_err(|e| multipart_error(e, "read file upload"))?;

                let max_file_size = state.config.uploads.max_file_size;
                if data.len() as u64 > max_file_size {
                    return Err(Error::PayloadTooLarge {
                        message: format!(
                            "File size exceeds maximum allowed size of {} bytes ({} MB)",
                            max_file_size,
                            max_file_size / (1024 * 1024)
                        ),
                    });
                }

                let file = StagedFile::stage(&state.config.uploads.dir, &filename, &mime_type, &data)
                    .await
                    .map_err(|e| Error::Staging {
                        operation: "write staged upload".to_string(),
                        source: e,
                    })?;

                debug!(
                    filename = file.filename(),
                    mime_type = file.mime_type(),
                    size = data.len(),
                    "Staged attachment"
                );
                staged = Some(file);
            }
            other => {
                debug!("Ignoring unknown multipart field: {}", other);
            }
        }
    }

    Ok(Submission { message, staged })
}

#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    summary = "Submit a message",
    description = "Submit a text message and/or a file attachment. The accumulated conversation is \
        forwarded to the upstream model and its reply is appended to the history. At least one of \
        `message` and `file` must be present.",
    request_body(
        content_type = "multipart/form-data",
        description = "Optional `message` text field and optional `file` binary field"
    ),
    params(
        ("x-confab-session" = Option<uuid::Uuid>, Header, description = "Session selector; omit to use the shared default session"),
    ),
    responses(
        (status = 200, description = "Reply produced", body = ChatResponse),
        (status = 400, description = "Empty submission or malformed request", body = crate::api::models::ErrorResponse),
        (status = 413, description = "Attachment too large", body = crate::api::models::ErrorResponse),
        (status = 500, description = "Upstream or internal failure", body = crate::api::models::ErrorResponse),
    )
)]
#[instrument(skip_all)]
pub async fn submit_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<ChatResponse>> {
    let session_id = session_id(&headers)?;
    let Submission { message, staged } = parse_submission(&state, multipart).await?;

    if message.is_none() && staged.is_none() {
        return Err(Error::BadRequest {
            message: "Provide a message, a file, or both".to_string(),
        });
    }

    let session = state.sessions.get_or_create(session_id);
    // Held across the upstream round-trip: submits to one session are serialized
    let mut conversation = session.conversation.lock().await;
    let committed_from = conversation.len();

    if let Some(text) = message.as_deref() {
        conversation.push_user_text(text);
    }

    // The prompt is the flattened history so far. The inline attachment rides
    // along for this call only; history records just the textual marker.
    let mut prompt_parts = conversation.prompt_parts(state.config.context.max_turns);

    if let Some(file) = &staged {
        match file.read().await {
            Ok(bytes) => {
                prompt_parts.push(Fragment::inline_data(file.mime_type(), BASE64.encode(&bytes)));
                conversation.push_upload_marker(file.filename());
            }
            Err(e) => {
                conversation.mark_failed_from(committed_from);
                return Err(Error::Staging {
                    operation: "read staged upload".to_string(),
                    source: e,
                });
            }
        }
    }

    match state.gemini.generate_content(&prompt_parts).await {
        Ok(reply) => {
            conversation.push_model_reply(&reply);
            session.touch();
            info!(
                session = %abbrev_uuid(&session_id),
                turns = conversation.len(),
                "Exchange completed"
            );
            Ok(Json(ChatResponse {
                history: conversation.turns().to_vec(),
                reply,
            }))
        }
        Err(e) => {
            conversation.mark_failed_from(committed_from);
            Err(Error::Upstream(e))
        }
    }
    // StagedFile drops here: the staged bytes are removed on every exit path
}

#[utoipa::path(
    get,
    path = "/history",
    tag = "chat",
    summary = "Get conversation history",
    description = "Return the session's conversation history. An unknown session yields an empty \
        history without creating one.",
    params(
        ("x-confab-session" = Option<uuid::Uuid>, Header, description = "Session selector; omit to use the shared default session"),
    ),
    responses(
        (status = 200, description = "Current history", body = HistoryResponse),
    )
)]
#[instrument(skip_all)]
pub async fn get_history(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<HistoryResponse>> {
    let session_id = session_id(&headers)?;

    let history = match state.sessions.get(session_id) {
        Some(session) => session.conversation.lock().await.turns().to_vec(),
        None => Vec::new(),
    };

    Ok(Json(HistoryResponse { history }))
}

#[utoipa::path(
    post,
    path = "/reset",
    tag = "chat",
    summary = "Reset conversation",
    description = "Clear the session's conversation history. Idempotent.",
    params(
        ("x-confab-session" = Option<uuid::Uuid>, Header, description = "Session selector; omit to use the shared default session"),
    ),
    responses(
        (status = 200, description = "History cleared", body = ResetResponse),
    )
)]
#[instrument(skip_all)]
pub async fn reset_chat(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<ResetResponse>> {
    let session_id = session_id(&headers)?;
    state.sessions.remove(session_id);
    info!(session = %abbrev_uuid(&session_id), "Chat history cleared");

    Ok(Json(ResetResponse {
        message: "Chat history cleared".to_string(),
    }))
}
