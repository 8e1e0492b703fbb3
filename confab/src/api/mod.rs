//! HTTP API surface: request handlers and the models they exchange.

pub mod handlers;
pub mod models;
