//! Error types for the webhook pipeline.
//!
//! Fatal outcomes are expressed as [`HaltReason`] values returned by each
//! stage; the driver short-circuits on the first one.  The remaining error
//! enums describe failures that are recovered locally (fallback reply,
//! skipped log append) and only ever reach the diagnostics sink.

use axum::http::StatusCode;
use thiserror::Error;

/// Coarse classification of fatal outcomes, used for metrics and status
/// mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Authorization,
    Configuration,
    MalformedInput,
    Validation,
}

impl ErrorClass {
    pub const ALL: [ErrorClass; 4] = [
        ErrorClass::Authorization,
        ErrorClass::Configuration,
        ErrorClass::MalformedInput,
        ErrorClass::Validation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Authorization => "authorization",
            ErrorClass::Configuration => "configuration",
            ErrorClass::MalformedInput => "malformed_input",
            ErrorClass::Validation => "validation",
        }
    }

    /// HTTP status returned to the caller.  Input problems are acknowledged
    /// with 200 so the platform does not keep redelivering the same update.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorClass::Authorization => StatusCode::FORBIDDEN,
            ErrorClass::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorClass::MalformedInput | ErrorClass::Validation => StatusCode::OK,
        }
    }
}

/// Reason a webhook delivery was halted before a reply was attempted.  The
/// `Display` text is the user-facing diagnostic string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HaltReason {
    #[error("Unauthorized access: the request did not come from the chat platform.")]
    Unauthorized,
    #[error("Invalid token: the bot token is incorrect.")]
    InvalidBotToken,
    #[error("Knowledge document unavailable: {0}")]
    KnowledgeUnavailable(String),
    #[error("Invalid data: {0}")]
    MalformedUpdate(String),
    #[error("Invalid input: the text exceeds the allowed length ({len} > {max}).")]
    TooLong { len: usize, max: usize },
    #[error("Invalid input: forbidden characters detected.")]
    ForbiddenCharacters,
}

impl HaltReason {
    pub fn class(&self) -> ErrorClass {
        match self {
            HaltReason::Unauthorized => ErrorClass::Authorization,
            HaltReason::InvalidBotToken | HaltReason::KnowledgeUnavailable(_) => {
                ErrorClass::Configuration
            }
            HaltReason::MalformedUpdate(_) => ErrorClass::MalformedInput,
            HaltReason::TooLong { .. } | HaltReason::ForbiddenCharacters => {
                ErrorClass::Validation
            }
        }
    }

    /// Stable machine-readable code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            HaltReason::Unauthorized => "unauthorized",
            HaltReason::InvalidBotToken => "invalid_bot_token",
            HaltReason::KnowledgeUnavailable(_) => "knowledge_unavailable",
            HaltReason::MalformedUpdate(_) => "malformed_update",
            HaltReason::TooLong { .. } => "too_long",
            HaltReason::ForbiddenCharacters => "forbidden_characters",
        }
    }
}

/// Failures reading or writing the JSON documents on disk.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures talking to the completion endpoint.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("response did not contain choices[0].message.content")]
    MissingContent,
}

/// Failures delivering the reply to the chat platform.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat platform answered with status {0}")]
    Status(u16),
}
