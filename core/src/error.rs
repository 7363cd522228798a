//! Error types for the request layer.
//!
//! # Design
//! Request outcomes never surface as `Err`: every failure a caller can see is
//! an `ApiError` inside a `NormalizedResult`. `ApiError::code` is a plain
//! string because it carries server-supplied discriminators verbatim next to
//! the client-local sentinels in [`codes`].
//!
//! `TransportError` and `ConfigError` are the library-level errors returned
//! by transports and by configuration loading.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Client-local error codes.
pub mod codes {
    /// The transport failed before a response was received.
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    /// The body did not match its declared content type.
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    /// Renewal failed after a 401.
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    /// Renewal failed after a 403.
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    /// A request body could not be encoded.
    pub const SERIALIZATION_ERROR: &str = "SERIALIZATION_ERROR";
    /// The credential was renewed but the request body had already been
    /// consumed and could not be sent again.
    pub const REPLAY_UNSUPPORTED: &str = "REPLAY_UNSUPPORTED";
}

/// A uniform error carried by failed `NormalizedResult`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{code} (status {status}): {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// HTTP status, or 0 when no response was received.
    pub status: u16,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            status,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// `HTTP_<status>` fallback code.
    pub fn http_code(status: u16) -> String {
        format!("HTTP_{status}")
    }

    pub fn network(err: &TransportError) -> Self {
        Self::new(codes::NETWORK_ERROR, err.to_string(), 0)
    }

    pub fn parse(message: impl Into<String>, status: u16) -> Self {
        Self::new(codes::PARSE_ERROR, message, status)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(codes::SERIALIZATION_ERROR, message, 0)
    }

    /// Error handed to every request of a failed renewal cycle. `status` is
    /// the status that made the request wait for renewal.
    pub fn session_ended(status: u16) -> Self {
        if status == 403 {
            Self::new(codes::UNAUTHORIZED, "Access denied. Please sign in again.", status)
        } else {
            Self::new(codes::UNAUTHENTICATED, "Your session has expired. Please sign in again.", status)
        }
    }

    pub fn replay_unsupported(status: u16) -> Self {
        Self::new(
            codes::REPLAY_UNSUPPORTED,
            "credential renewed but the request body cannot be sent twice",
            status,
        )
    }
}

/// Failures raised by a `Transport` before any response exists.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[cfg(feature = "client")]
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Invalid or missing client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("no transport configured")]
    MissingTransport,

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] TransportError),
}
