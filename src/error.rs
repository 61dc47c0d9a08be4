use crate::protocol::event_type::EventType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[serde(other)]
    Unknown,
}

/// Error payload carried by `error` and `*.failed` server events.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    pub code: Option<String>,
    pub message: String,
    pub param: Option<String>,
    pub event_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error("Header name error: {0}")]
    HeaderName(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderName),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication rejected by server (status {status})")]
    Authentication { status: u16 },

    #[error("Transport is not connected")]
    NotConnected,

    #[error("No session.created received within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("No {event_type} acknowledgement received within {timeout:?}")]
    AckTimeout {
        event_type: EventType,
        timeout: Duration,
    },

    #[error("Failed to decode inbound frame: {0}")]
    Decode(String),

    #[error("Malformed {event_type} event: {reason}")]
    MalformedEvent { event_type: EventType, reason: String },

    #[error("Invalid event type tag: {0:?}")]
    InvalidEventType(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool {name} failed: {message}")]
    ToolExecution { name: String, message: String },

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("Invalid client event: {0}")]
    InvalidClientEvent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
