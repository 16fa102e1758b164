use thiserror::Error;

use crate::event::{bridge::DropReason, kind::RequestKind};

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Channel is not connected")]
    Disconnected,

    #[error("Message send failed: {message}")]
    SendFailed { message: String },

    #[error("Request dropped: {0}")]
    Dropped(DropReason),

    #[error("Response timed out: {kind} ({request_id})")]
    Timeout { kind: RequestKind, request_id: String },

    #[error("Request cancelled: {kind}")]
    Cancelled { kind: RequestKind },

    #[error("Request superseded by a newer one: {kind}")]
    Superseded { kind: RequestKind },

    #[error("Design service reported failure: {kind}")]
    ServiceFailure { kind: RequestKind },

    #[error("Response channel closed")]
    ChannelClosed,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        BridgeError::Config(message.into())
    }
}
