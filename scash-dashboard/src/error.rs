//! Error types for the dashboard client.
//!
//! Failures fall into three kinds, each handled differently by callers:
//!
//! - [`TransportError`]: the backend could not be reached or answered
//!   with something that is not a JSON object. Logged and reported with
//!   a generic message; never stops polling.
//! - [`ValidationError`]: bad input caught before any request is sent.
//! - [`ServerError`]: the backend answered `ok: false`. Its text is shown
//!   verbatim and the current display is left alone.
//!
//! None of these stop the dashboard; they end up as outcomes and
//! messages. [`Error`] covers the one thing that does: a configuration
//! that cannot be loaded.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::api_client::TransportError;
pub use crate::setup::ValidationError;

/// A request the backend understood but refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServerError {
    /// HTTP status (or the `status` field the backend reported).
    pub status: u16,
    /// Server-provided text, or a fallback when the body had none.
    pub message: String,
}

/// Failure to assemble the dashboard configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
