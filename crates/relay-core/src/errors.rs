use std::path::PathBuf;

/// Core error type for the relay.
///
/// Adapter crates map provider-specific errors (HTTP, websocket, bot API) into
/// this type so the orchestrator handles every channel the same way.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("no channel for JID: {jid}")]
    NoChannel { jid: String },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
