//! Client-side session manager.
//!
//! Mirrors what the browser page does: keep a display-only copy of the
//! conversation, append the user's turn optimistically before the network
//! call resolves, and mark it failed (rather than removing it) when the call
//! doesn't. The server's `history` field stays authoritative; this copy is
//! never reconciled against it beyond appending the reply.
//!
//! Display turns may carry local-only data (a preview path for image
//! attachments) that never leaves the client.

use std::path::{Path, PathBuf};

use anyhow::Context;
use url::Url;
use uuid::Uuid;

use crate::api::models::{ChatResponse, ErrorResponse};
use crate::api::handlers::chat::SESSION_HEADER;
use crate::chat::Role;
use crate::types::SessionId;

/// One locally rendered message. Not the server's [`Turn`](crate::chat::Turn):
/// it adds display-only fields and drops the fragment structure.
#[derive(Debug, Clone)]
pub struct DisplayTurn {
    pub role: Role,
    pub text: String,
    /// Attached filename, if the turn carried an upload
    pub attachment: Option<String>,
    /// Local preview path for image attachments; never sent to the server
    pub preview: Option<PathBuf>,
    /// Set when the exchange this turn belongs to failed
    pub failed: bool,
}

/// HTTP client driving the conversation proxy.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: Url,
    session: SessionId,
    history: Vec<DisplayTurn>,
}

impl ChatClient {
    /// Create a client with a fresh session id.
    pub fn new(base_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            session: Uuid::new_v4(),
            history: Vec::new(),
        }
    }

    /// The locally rendered history (display copy, not authoritative).
    pub fn history(&self) -> &[DisplayTurn] {
        &self.history
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), suffix)
    }

    /// Send a message and/or attachment.
    ///
    /// The user turn is appended to the display history before the request is
    /// made; on failure it stays, marked failed, matching the server-side
    /// commit discipline.
    pub async fn send(&mut self, message: Option<&str>, attachment: Option<&Path>) -> anyhow::Result<String> {
        if message.is_none() && attachment.is_none() {
            anyhow::bail!("Nothing to send: provide a message, a file, or both");
        }

        let filename = attachment.and_then(|path| path.file_name()).map(|name| name.to_string_lossy().into_owned());
        let preview = attachment
            .filter(|path| {
                mime_guess::from_path(path)
                    .first()
                    .is_some_and(|mime| mime.type_() == mime_guess::mime::IMAGE)
            })
            .map(Path::to_path_buf);

        // Optimistic append, then clear of inputs is the caller's concern
        let optimistic_index = self.history.len();
        self.history.push(DisplayTurn {
            role: Role::User,
            text: message.unwrap_or_default().to_string(),
            attachment: filename,
            preview,
            failed: false,
        });

        match self.post_chat(message, attachment).await {
            Ok(reply) => {
                self.history.push(DisplayTurn {
                    role: Role::Model,
                    text: reply.clone(),
                    attachment: None,
                    preview: None,
                    failed: false,
                });
                Ok(reply)
            }
            Err(e) => {
                self.history[optimistic_index].failed = true;
                Err(e)
            }
        }
    }

    async fn post_chat(&self, message: Option<&str>, attachment: Option<&Path>) -> anyhow::Result<String> {
        let mut form = reqwest::multipart::Form::new();
        if let Some(message) = message {
            form = form.text("message", message.to_string());
        }
        if let Some(path) = attachment {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read attachment {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            // Browsers set the part's content type from the file extension
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name(filename)
                .mime_str(mime.as_ref())?;
            form = form.part("file", part);
        }

        let response = self
            .http
            .post(self.endpoint("chat"))
            .header(SESSION_HEADER, self.session.to_string())
            .multipart(form)
            .send()
            .await
            .context("Failed to reach the chat server")?;

        if !response.status().is_success() {
            let status = response.status();
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error,
                Err(_) => format!("HTTP {status}"),
            };
            anyhow::bail!("Chat request failed: {message}");
        }

        let body: ChatResponse = response.json().await.context("Malformed chat response")?;
        Ok(body.reply)
    }

    /// Reset the conversation. The local history is cleared regardless of
    /// whether the server acknowledged the reset.
    pub async fn reset(&mut self) -> anyhow::Result<()> {
        let result = self
            .http
            .post(self.endpoint("reset"))
            .header(SESSION_HEADER, self.session.to_string())
            .send()
            .await;

        self.history.clear();

        result.context("Failed to reach the chat server")?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ChatClient {
        ChatClient::new(Url::parse(&server.uri()).unwrap())
    }

    #[tokio::test]
    async fn test_send_appends_user_then_model_turn() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(header_exists("x-confab-session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "reply": "Hello!",
                "history": [
                    {"role": "user", "parts": [{"text": "Hi"}], "status": "completed"},
                    {"role": "model", "parts": [{"text": "Hello!"}], "status": "completed"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let mut client = client_for(&mock_server);
        let reply = client.send(Some("Hi"), None).await.unwrap();

        assert_eq!(reply, "Hello!");
        assert_eq!(client.history().len(), 2);
        assert_eq!(client.history()[0].role, Role::User);
        assert!(!client.history()[0].failed);
        assert_eq!(client.history()[1].text, "Hello!");
    }

    #[tokio::test]
    async fn test_failure_keeps_optimistic_turn_marked_failed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "upstream exploded"})))
            .mount(&mock_server)
            .await;

        let mut client = client_for(&mock_server);
        let err = client.send(Some("Hi"), None).await.unwrap_err();

        assert!(err.to_string().contains("upstream exploded"));
        assert_eq!(client.history().len(), 1);
        assert!(client.history()[0].failed);
    }

    #[tokio::test]
    async fn test_send_attachment_sets_preview_for_images_only() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reply": "ok", "history": []})))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("photo.png");
        std::fs::File::create(&image).unwrap().write_all(b"png").unwrap();
        let doc = dir.path().join("notes.txt");
        std::fs::File::create(&doc).unwrap().write_all(b"txt").unwrap();

        let mut client = client_for(&mock_server);
        client.send(None, Some(&image)).await.unwrap();
        client.send(Some("see attached"), Some(&doc)).await.unwrap();

        assert_eq!(client.history()[0].attachment.as_deref(), Some("photo.png"));
        assert_eq!(client.history()[0].preview.as_deref(), Some(image.as_path()));
        assert_eq!(client.history()[2].attachment.as_deref(), Some("notes.txt"));
        assert!(client.history()[2].preview.is_none());
    }

    #[tokio::test]
    async fn test_empty_send_is_rejected_locally() {
        let mock_server = MockServer::start().await;
        let mut client = client_for(&mock_server);

        assert!(client.send(None, None).await.is_err());
        assert!(client.history().is_empty());
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_history_even_when_server_is_down() {
        // Bind-then-drop to get a port nothing is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut client = ChatClient::new(Url::parse(&dead_uri).unwrap());
        client.history.push(DisplayTurn {
            role: Role::User,
            text: "stale".to_string(),
            attachment: None,
            preview: None,
            failed: false,
        });

        let result = client.reset().await;

        assert!(result.is_err());
        assert!(client.history().is_empty());
    }

    #[tokio::test]
    async fn test_reset_posts_to_server() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reset"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Chat history cleared"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut client = client_for(&mock_server);
        client.reset().await.unwrap();

        assert!(client.history().is_empty());
    }
}
