//! Error types for the Marvel MCP server.

use serde::Serialize;
use thiserror::Error;

use crate::mcp::protocol::error_codes;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the server.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Protocol Errors =====
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("Channel closed")]
    ChannelClosed,

    // ===== Catalog Errors =====
    #[error("Invalid URI template: {0}")]
    InvalidTemplate(String),

    #[error("Ambiguous catalog entry: {0}")]
    AmbiguousTemplate(String),

    #[error("File too large: {path} ({size} bytes)")]
    FileTooLarge { path: String, size: u64 },

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ===== HTTP Errors =====
    #[error("HTTP server error: {0}")]
    HttpServer(String),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout: operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Cancelled: operation was cancelled")]
    Cancelled,
}

/// Stable error kinds reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ProtocolError,
    UnknownMethod,
    ResourceNotFound,
    ToolNotFound,
    PromptNotFound,
    InvalidArguments,
    BackendFailure,
    ChannelClosed,
}

impl ErrorKind {
    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::UnknownMethod => "UNKNOWN_METHOD",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::PromptNotFound => "PROMPT_NOT_FOUND",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::BackendFailure => "BACKEND_FAILURE",
            Self::ChannelClosed => "CHANNEL_CLOSED",
        }
    }

    /// JSON-RPC error code for this kind.
    pub fn code(&self) -> i32 {
        match self {
            Self::ProtocolError => error_codes::INVALID_REQUEST,
            Self::UnknownMethod => error_codes::METHOD_NOT_FOUND,
            Self::ResourceNotFound => error_codes::RESOURCE_NOT_FOUND,
            Self::ToolNotFound => error_codes::TOOL_NOT_FOUND,
            Self::PromptNotFound => error_codes::PROMPT_NOT_FOUND,
            Self::InvalidArguments => error_codes::INVALID_PARAMS,
            Self::BackendFailure | Self::ChannelClosed => error_codes::INTERNAL_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error into the client-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) | Self::Malformed(_) => ErrorKind::ProtocolError,
            Self::UnknownMethod(_) => ErrorKind::UnknownMethod,
            Self::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            Self::ToolNotFound(_) => ErrorKind::ToolNotFound,
            Self::PromptNotFound(_) => ErrorKind::PromptNotFound,
            Self::InvalidArguments(_) => ErrorKind::InvalidArguments,
            Self::ChannelClosed => ErrorKind::ChannelClosed,
            Self::Backend(_)
            | Self::InvalidTemplate(_)
            | Self::AmbiguousTemplate(_)
            | Self::FileTooLarge { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::Sqlite(_)
            | Self::HttpServer(_)
            | Self::Internal(_)
            | Self::Config(_)
            | Self::Timeout { .. }
            | Self::Cancelled => ErrorKind::BackendFailure,
        }
    }

    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Malformed(_) => error_codes::PARSE_ERROR,
            _ => self.kind().code(),
        }
    }

    /// Message safe to send to a client.
    ///
    /// Backend failures keep their detail but never echo file-system paths.
    pub fn client_message(&self) -> String {
        match self {
            Self::Io(e) => format!("Backend failure: I/O error ({:?})", e.kind()),
            Self::FileTooLarge { size, .. } => {
                format!("Backend failure: content too large ({} bytes)", size)
            }
            Self::Sqlite(e) => format!("Backend failure: query failed: {}", e),
            Self::Json(e) => format!("Backend failure: serialization failed: {}", e),
            Self::Yaml(_) | Self::Config(_) | Self::HttpServer(_) => {
                "Backend failure: server misconfigured".to_string()
            }
            Self::Internal(_) => "Backend failure: internal error".to_string(),
            Self::Timeout { seconds } => {
                format!("Backend failure: operation timed out after {} seconds", seconds)
            }
            Self::Cancelled => "Backend failure: operation was cancelled".to_string(),
            Self::InvalidTemplate(_) | Self::AmbiguousTemplate(_) => {
                "Backend failure: catalog misconfigured".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Whether this error ends the session rather than producing a response.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let not_found = Error::ResourceNotFound("mcp://marvel/heroes/nobody".to_string());
        assert_eq!(
            not_found.to_string(),
            "Resource not found: mcp://marvel/heroes/nobody"
        );

        let protocol = Error::Protocol("session not initialized".to_string());
        assert_eq!(protocol.to_string(), "Protocol error: session not initialized");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::Protocol("x".into()).kind(),
            ErrorKind::ProtocolError
        );
        assert_eq!(
            Error::Malformed("x".into()).kind(),
            ErrorKind::ProtocolError
        );
        assert_eq!(
            Error::UnknownMethod("x".into()).kind(),
            ErrorKind::UnknownMethod
        );
        assert_eq!(
            Error::ToolNotFound("x".into()).kind(),
            ErrorKind::ToolNotFound
        );
        assert_eq!(
            Error::PromptNotFound("x".into()).kind(),
            ErrorKind::PromptNotFound
        );
        assert_eq!(
            Error::InvalidArguments("x".into()).kind(),
            ErrorKind::InvalidArguments
        );
        assert_eq!(Error::ChannelClosed.kind(), ErrorKind::ChannelClosed);
        assert_eq!(
            Error::Timeout { seconds: 5 }.kind(),
            ErrorKind::BackendFailure
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Protocol("x".into()).code(), -32600);
        assert_eq!(Error::Malformed("x".into()).code(), -32700);
        assert_eq!(Error::UnknownMethod("x".into()).code(), -32601);
        assert_eq!(Error::InvalidArguments("x".into()).code(), -32602);
        assert_eq!(Error::ResourceNotFound("x".into()).code(), -32002);
        assert_eq!(Error::Backend("x".into()).code(), -32603);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::ResourceNotFound).unwrap();
        assert_eq!(json, "\"RESOURCE_NOT_FOUND\"");
        assert_eq!(ErrorKind::BackendFailure.to_string(), "BACKEND_FAILURE");
    }

    #[test]
    fn test_client_message_hides_paths() {
        let io = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/srv/secret/data/hero_hulk.txt",
        ));
        let message = io.client_message();
        assert!(message.contains("PermissionDenied"));
        assert!(!message.contains("/srv/secret"));

        let large = Error::FileTooLarge {
            path: "/srv/secret/huge.md".to_string(),
            size: 2_000_000,
        };
        assert!(!large.client_message().contains("/srv/secret"));
        assert!(large.client_message().contains("2000000"));
    }

    #[test]
    fn test_client_message_keeps_domain_detail() {
        let backend = Error::Backend("database unavailable".to_string());
        assert_eq!(backend.client_message(), "Backend failure: database unavailable");

        let args = Error::InvalidArguments("missing required argument: hero1".to_string());
        assert!(args.client_message().contains("hero1"));
    }

    #[test]
    fn test_timeout_and_cancelled() {
        let timeout = Error::Timeout { seconds: 60 };
        assert_eq!(
            timeout.to_string(),
            "Timeout: operation timed out after 60 seconds"
        );

        let cancelled = Error::Cancelled;
        assert_eq!(cancelled.to_string(), "Cancelled: operation was cancelled");
        assert!(!cancelled.is_channel_closed());
        assert!(Error::ChannelClosed.is_channel_closed());
    }
}
