//! Error types for nzbtunnel
//!
//! This module provides the error taxonomy for the whole crate:
//! - Domain-specific error types (Nntp, Yenc, Database, PostProcess)
//! - The top-level [`Error`] with conversions from every domain error
//! - HTTP status code mapping for the control plane

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for nzbtunnel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nzbtunnel
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "incomplete_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// NNTP protocol, transport, or pool error
    #[error("NNTP error: {0}")]
    Nntp(#[from] NntpError),

    /// yEnc decode error
    #[error("yEnc error: {0}")]
    Yenc(#[from] YencError),

    /// Invalid NZB file
    #[error("invalid NZB: {0}")]
    InvalidNzb(String),

    /// Post-processing error (extraction, relocation)
    #[error("post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Download not found
    #[error("download not found: {0}")]
    NotFound(String),

    /// Operation cancelled by the user
    #[error("cancelled by user")]
    Cancelled,

    /// Shutdown in progress - not accepting new downloads
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Network error (NZB URL fetching)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// VPN coordinator error
    #[error("VPN error: {0}")]
    Vpn(String),

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the download
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// External tool execution failed (wg-quick, openvpn, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// NNTP transport and protocol errors
///
/// These are per-connection errors. The pool manager treats every variant
/// except [`NntpError::Cancelled`] as grounds to discard the connection and
/// retry on another server.
#[derive(Debug, Error)]
pub enum NntpError {
    /// Socket-level I/O failure
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// A read or write deadline expired
    #[error("operation timed out")]
    Timeout,

    /// The server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The server sent a line we could not parse as an NNTP response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The server answered with an unexpected status code
    #[error("protocol error: {code} {message}")]
    Protocol {
        /// Three-digit NNTP response code
        code: u16,
        /// Response message text
        message: String,
    },

    /// AUTHINFO exchange was rejected
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// BODY request answered with a non-222 code (430 no-such-article etc.)
    #[error("article <{message_id}> unavailable ({code})")]
    ArticleUnavailable {
        /// Message-id of the requested article (without angle brackets)
        message_id: String,
        /// The NNTP response code the server returned
        code: u16,
    },

    /// The caller's cancellation token fired while waiting
    #[error("cancelled")]
    Cancelled,

    /// Lease attempted on a pool that has been closed
    #[error("connection pool closed")]
    PoolClosed,

    /// No enabled servers are configured
    #[error("no enabled news servers configured")]
    NoServers,

    /// Interface binding requested on an unsupported platform
    #[error("interface binding not supported: {0}")]
    BindNotSupported(String),

    /// All pools and retry rounds were exhausted for one article
    #[error("article <{message_id}> failed after {attempts} attempts: {last}")]
    FetchExhausted {
        /// Message-id that could not be fetched
        message_id: String,
        /// Total lease/fetch attempts made across all pools and rounds
        attempts: u32,
        /// Display form of the last error observed
        last: String,
    },
}

/// yEnc decode errors
#[derive(Debug, Error)]
pub enum YencError {
    /// No `=ybegin` header line found in the article body
    #[error("missing =ybegin header")]
    MissingHeader,

    /// No `=yend` trailer line found
    #[error("missing =yend trailer")]
    MissingTrailer,

    /// A header/trailer keyword was malformed
    #[error("malformed yEnc {line} line: {reason}")]
    Malformed {
        /// Which line was malformed ("ybegin", "ypart", or "yend")
        line: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Decoded payload CRC32 does not match the trailer
    #[error("CRC32 mismatch: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch {
        /// CRC32 the trailer declared
        expected: u32,
        /// CRC32 computed over the decoded payload
        actual: u32,
    },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate server name)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Post-processing errors (extraction, relocation)
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// Archive extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// Wrong password for encrypted archive
    #[error("wrong password for encrypted archive {archive}")]
    WrongPassword {
        /// The encrypted archive that could not be opened
        archive: PathBuf,
    },

    /// All passwords failed for archive extraction
    #[error("all {count} passwords failed for archive {archive}")]
    AllPasswordsFailed {
        /// The encrypted archive that could not be opened
        archive: PathBuf,
        /// The number of passwords that were tried
        count: usize,
    },

    /// File move/rename failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path of the file being moved
        source_path: PathBuf,
        /// The destination path where the file should be moved
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// Cleanup failed (non-fatal, usually logged as warning)
    #[error("cleanup failed for download {id}: {reason}")]
    CleanupFailed {
        /// The download ID for which cleanup failed
        id: i64,
        /// The reason cleanup failed
        reason: String,
    },

    /// Invalid path encountered during post-processing
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The invalid path that was encountered
        path: PathBuf,
        /// The reason the path is invalid
        reason: String,
    },
}

impl Error {
    /// True when this error is (or wraps) a user cancellation.
    ///
    /// Cancellation is not reported as a failure beyond the literal
    /// "cancelled by user" message on the job record.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::Nntp(NntpError::Cancelled)
        )
    }
}

/// API error response format
///
/// Returned by the admin endpoints when an error occurs. The SABnzbd
/// emulation endpoints use SABnzbd's own ad-hoc shapes instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create a "conflict" error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::InvalidNzb(_) => 422, // Unprocessable Entity
            Error::Yenc(_) => 422,

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::Database(DatabaseError::NotFound(_)) => 404,

            // 409 Conflict
            Error::Database(DatabaseError::ConstraintViolation(_)) => 409,
            Error::Cancelled => 409,

            // 422 Unprocessable Entity - Semantic errors
            Error::PostProcess(_) => 422,
            Error::InsufficientSpace { .. } => 422,

            // 500 Internal Server Error
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External service errors
            Error::Nntp(_) => 502,
            Error::Network(_) => 502,
            Error::Vpn(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
            Error::ExternalTool(_) => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(DatabaseError::NotFound(_)) => "not_found",
            Error::Database(DatabaseError::ConstraintViolation(_)) => "conflict",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Nntp(_) => "nntp_error",
            Error::Yenc(_) => "decode_error",
            Error::InvalidNzb(_) => "invalid_nzb",
            Error::PostProcess(_) => "post_process_error",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::Cancelled => "cancelled",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Vpn(_) => "vpn_error",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError::new(error.error_code().to_string(), error.to_string())
    }
}
