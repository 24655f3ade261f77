//! Error types for taskdesk
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad input, unknown ids, not signed in)
//! - 3: Blocked by policy (permission denied)
//! - 4: Operation failed (store, I/O, subscription failures)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the taskdesk CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Failure of a live subscription.
///
/// Delivered on a feed's error channel. Fanned out to every open feed, so it
/// must stay `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("store closed")]
    Closed,
}

/// Main error type for taskdesk operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    /// `collection/id` of a document a write expected to exist.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email already registered: {0}")]
    EmailInUse(String),

    // Policy blocks (exit code 3)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Subscription failed: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::Validation(_)
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::TaskNotFound(_)
            | Error::UserNotFound(_)
            | Error::DocumentNotFound(_)
            | Error::NotSignedIn
            | Error::InvalidCredentials
            | Error::EmailInUse(_) => exit_codes::USER_ERROR,

            // Policy blocks
            Error::PermissionDenied(_) => exit_codes::POLICY_BLOCKED,

            // Operation failures
            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::Store(_)
            | Error::Subscription(_)
            | Error::Watch(_)
            | Error::PasswordHash(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for the JSON error envelope, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::TaskNotFound(id) => Some(serde_json::json!({ "task_id": id })),
            Error::UserNotFound(user) => Some(serde_json::json!({ "user": user })),
            Error::DocumentNotFound(path) => Some(serde_json::json!({ "document": path })),
            Error::EmailInUse(email) => Some(serde_json::json!({ "email": email })),
            Error::InvalidConfig(message) => Some(serde_json::json!({ "message": message })),
            Error::LockFailed(path) => {
                Some(serde_json::json!({ "lock": path.to_string_lossy() }))
            }
            _ => None,
        }
    }
}

/// Result type alias for taskdesk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
