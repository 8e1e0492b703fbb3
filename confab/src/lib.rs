//! # confab: a Gemini chat proxy
//!
//! `confab` is a small chat web application: a browser (or terminal) client
//! collects user text and an optional file attachment, posts them to this
//! backend, and the backend forwards the accumulated conversation to the
//! Google generative-language (Gemini) API, returning the reply alongside the
//! full updated history.
//!
//! ## Overview
//!
//! The service is a conversation proxy. It owns the authoritative in-memory
//! history for each session, merges incoming user turns and file-upload
//! markers into it, flattens the history into the prompt-parts sequence sent
//! upstream on every call, and appends the model's reply. Clients keep only a
//! display copy.
//!
//! ### Request Flow
//!
//! A `POST /chat` multipart request carries an optional `message` text field
//! and an optional `file` binary field. Attachments are staged to disk, sent
//! upstream as a base64 inline-data fragment for that call only, and recorded
//! in history as a textual upload marker; the staged bytes are removed on
//! every exit path. If the upstream call fails, the turns committed for that
//! call stay in history tagged `failed` - there is no rollback, and no retry.
//!
//! ### Sessions
//!
//! Conversations are keyed by the `x-confab-session` header (a UUID). Clients
//! that send no header share the nil session, preserving single-user
//! behavior. Each session's history sits behind a mutex held across the
//! upstream round-trip, so rapid double-submissions queue instead of racing.
//! A background reaper evicts sessions idle past a configurable timeout.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use confab::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = confab::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     confab::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module. The one required setting is the upstream
//! credential, usually supplied as `GEMINI_API_KEY`; startup fails without it.

pub mod api;
pub mod chat;
pub mod client;
pub mod config;
pub mod errors;
pub mod gemini;
mod openapi;
mod static_assets;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::{
    Json, Router,
    routing::{get, post},
};
use bon::Builder;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::chat::session::SessionStore;
use crate::config::CorsOrigin;
use crate::gemini::GeminiClient;
use crate::openapi::ApiDoc;

pub use config::Config;
pub use types::SessionId;

/// Application state shared across all request handlers.
///
/// Cloneable; holds the configuration, the session store, and the upstream
/// Gemini client.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionStore>,
    pub gemini: Arc<GeminiClient>,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // tower-http rejects "*" inside AllowOrigin::list; it must be AllowOrigin::any()
    let allow_origin = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            let header_value = match origin {
                CorsOrigin::Wildcard => unreachable!(),
                CorsOrigin::Url(url) => url.as_str().parse::<HeaderValue>()?,
            };
            origins.push(header_value);
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new().allow_origin(allow_origin).allow_methods(tower_http::cors::Any);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - Chat endpoints (`/chat`, `/history`, `/reset`)
/// - Model discovery (`/models`)
/// - API docs (`/docs`, `/api-docs/openapi.json`)
/// - Embedded static frontend on the fallback route
/// - CORS and tracing middleware
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    // Multipart bodies carry the upload plus form overhead
    let body_limit = usize::try_from(state.config.uploads.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(64 * 1024);

    let api_routes = Router::new()
        .route(
            "/chat",
            post(api::handlers::chat::submit_message).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/history", get(api::handlers::chat::get_history))
        .route("/reset", post(api::handlers::chat::reset_chat))
        .route("/models", get(api::handlers::models::list_models))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .merge(api_routes)
        .fallback(get(api::handlers::static_assets::serve_embedded_asset));

    // Create CORS layer from config
    let cors_layer = create_cors_layer(&state.config)?;
    let router = router.layer(cors_layer);

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Container for background tasks and their lifecycle management.
///
/// Currently that's the session reaper. When dropped, the `drop_guard`
/// cancels the shutdown token, signaling tasks to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Setup background services (session reaper)
fn setup_background_services(
    sessions: Arc<SessionStore>,
    config: &Config,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let reaper_shutdown = shutdown_token.clone();
    let idle_timeout = config.sessions.idle_timeout;
    let sweep_interval = config.sessions.sweep_interval;
    let handle = tokio::spawn(async move {
        info!(
            idle_timeout = ?idle_timeout,
            sweep_interval = ?sweep_interval,
            "Starting session reaper"
        );
        chat::session::run_reaper(sessions, idle_timeout, sweep_interval, reaper_shutdown).await;
    });
    background_tasks.push(handle);

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] validates resources, creates the
///    uploads directory, and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts
///    handling requests
/// 3. **Shutdown**: when the shutdown future resolves, gracefully stops
///    background services
pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting confab with configuration: {:#?}", config);

        // Staging directory must exist before the first upload arrives
        tokio::fs::create_dir_all(&config.uploads.dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create uploads directory {}: {}", config.uploads.dir.display(), e))?;

        let sessions = Arc::new(SessionStore::new());
        let gemini = Arc::new(GeminiClient::from_config(&config.gemini)?);

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let bg_services = setup_background_services(sessions.clone(), &config, shutdown_token);

        let state = AppState::builder().config(config.clone()).sessions(sessions).gemini(gemini).build();
        let router = build_router(&state)?;

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Confab listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Shutdown background services and wait for tasks to complete
        self.bg_services.shutdown().await;

        Ok(())
    }
}
