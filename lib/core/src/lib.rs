//! Shared foundations for persona-studio.
//!
//! Identifiers used to correlate requests and invocations in logs, plus the
//! `Result` alias every crate uses at its public boundary.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{InvocationId, ParseIdError, RequestId};
