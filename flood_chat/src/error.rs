// src/error.rs
use std::net::SocketAddr;

use thiserror::Error;

/// Reasons a single frame is rejected by the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("expected 4 pipe-delimited fields, got {0}")]
    MissingFields(usize),
    #[error("unknown message kind: {0}")]
    WrongKind(String),
    #[error("empty message id")]
    EmptyId,
    #[error("frame is not valid utf-8")]
    InvalidUtf8,
    #[error("field `{0}` must not contain '|'")]
    ForbiddenDelimiter(&'static str),
    #[error("field `{0}` must not contain a line terminator")]
    LineTerminator(&'static str),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config: {0}")]
    Config(String),
    #[error("store: {0}")]
    Store(String),
    #[error("outbound queue full for {0}")]
    QueueFull(SocketAddr),
    #[error("connection to {0} is closed")]
    Disconnected(SocketAddr),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<sled::Error> for ChatError {
    fn from(e: sled::Error) -> Self {
        ChatError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Store(e.to_string())
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
