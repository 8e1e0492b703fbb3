//! HTTP request handlers for all API endpoints.
//!
//! - [`chat`]: message submission, history retrieval, and reset
//! - [`models`]: upstream model discovery
//! - [`static_assets`]: embedded frontend serving
//!
//! Handlers return [`crate::errors::Error`], which converts to the
//! appropriate HTTP status code with an `{"error": ...}` JSON body.

pub mod chat;
pub mod models;
pub mod static_assets;
