//! persona-studio HTTP host.
//!
//! Exposes the AI actions as `POST /api/ai` with an `{action, payload}`
//! body, plus a `GET /health` probe.

pub mod app;
pub mod config;
pub mod error;
