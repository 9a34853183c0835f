//! Error types for Vesper.
//!
//! Provides structured errors with:
//! - Unique error codes surfaced through counters and status subscribers
//! - Source error chaining
//! - Client vs server error categorization

use std::io;
use thiserror::Error;

/// Result type for Vesper operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes surfaced through status subscribers and logs.
///
/// Codes are structured as:
/// - 1xxx: Validation errors (client)
/// - 2xxx: Not found errors (client)
/// - 3xxx: Conflict errors (client)
/// - 4xxx: Dispatcher errors
/// - 5xxx: Chain synchronization errors
/// - 6xxx: Storage errors (server)
/// - 7xxx: Internal errors (server)
/// - 8xxx: Throttle rejections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    // Validation errors (1xxx)
    InvalidHash = 1001,
    InvalidKey = 1002,
    InvalidSignature = 1003,
    InvalidTransaction = 1004,
    InvalidBlock = 1005,
    BrokenChainLink = 1006,
    TimestampTooFarInFuture = 1007,
    InvalidArgument = 1008,
    DeadlineExpired = 1009,
    InsufficientBalance = 1010,
    StaleTimestamp = 1011,

    // Not found errors (2xxx)
    BlockNotFound = 2001,
    AccountNotFound = 2002,

    // Conflict errors (3xxx)
    DuplicateHash = 3001,
    DeltaInUse = 3002,

    // Dispatcher errors (4xxx)
    DispatcherFull = 4001,
    InvalidInput = 4002,
    Shutdown = 4003,

    // Chain synchronization errors (5xxx)
    RemoteChainTooManyBlocks = 5001,
    RemoteChainTooFarAhead = 5002,
    TooManyRollbacks = 5003,
    InvalidDifficulty = 5004,
    ProcessorFailure = 5005,
    LowerScore = 5006,

    // Storage errors (6xxx)
    StorageRead = 6001,
    StorageWrite = 6002,

    // Internal errors (7xxx)
    Serialization = 7001,
    Internal = 7002,

    // Throttle rejections (8xxx)
    ThrottleCacheFull = 8001,
    ThrottleAccountLimit = 8002,
    ThrottleBlockLimit = 8003,
}

impl ErrorCode {
    /// Get the numeric code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Check if this is a client error.
    pub fn is_client_error(self) -> bool {
        (1000..4000).contains(&self.code()) || self.code() >= 8000
    }

    /// Check if this is a server error.
    pub fn is_server_error(self) -> bool {
        (6000..8000).contains(&self.code())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

/// Outcome of a single validator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    /// The entity passed.
    Success,
    /// The entity was not objectionable but also not endorsed
    /// (e.g. already known).
    Neutral,
    /// The entity failed with the given code.
    Failure(ErrorCode),
}

impl ValidationResult {
    /// Check if this result allows processing to continue.
    pub fn is_success(&self) -> bool {
        matches!(self, ValidationResult::Success)
    }

    /// Check if this result is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, ValidationResult::Failure(_))
    }

    /// Get the failure code, if any.
    pub fn failure_code(&self) -> Option<ErrorCode> {
        match self {
            ValidationResult::Failure(code) => Some(*code),
            _ => None,
        }
    }

    /// Merge two results, keeping the most severe.
    pub fn and(self, other: ValidationResult) -> ValidationResult {
        match (self, other) {
            (ValidationResult::Failure(code), _) => ValidationResult::Failure(code),
            (_, ValidationResult::Failure(code)) => ValidationResult::Failure(code),
            (ValidationResult::Neutral, _) | (_, ValidationResult::Neutral) => {
                ValidationResult::Neutral
            }
            _ => ValidationResult::Success,
        }
    }
}

/// Errors that can occur in Vesper.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity validation failed.
    #[error("[{code}] validation failed: {message}")]
    Validation { code: ErrorCode, message: String },

    /// Signature verification failed.
    #[error("[{code}] signature verification failed")]
    InvalidSignature { code: ErrorCode },

    /// Item not found.
    #[error("[{code}] not found: {message}")]
    NotFound { code: ErrorCode, message: String },

    /// Duplicate item.
    #[error("[{code}] duplicate: {message}")]
    Duplicate { code: ErrorCode, message: String },

    /// Dispatcher-level failure.
    #[error("[{code}] dispatcher error: {message}")]
    Dispatcher { code: ErrorCode, message: String },

    /// Chain synchronization failure.
    #[error("[{code}] sync error: {message}")]
    Sync { code: ErrorCode, message: String },

    /// Storage operation failed.
    #[error("[{code}] storage error: {message}")]
    Storage {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization failed.
    #[error("[{code}] serialization error: {message}")]
    Serialization {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error.
    #[error("[{code}] internal error: {message}")]
    Internal { code: ErrorCode, message: String },
}

impl Error {
    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation { code, .. } => *code,
            Error::InvalidSignature { code } => *code,
            Error::NotFound { code, .. } => *code,
            Error::Duplicate { code, .. } => *code,
            Error::Dispatcher { code, .. } => *code,
            Error::Sync { code, .. } => *code,
            Error::Storage { code, .. } => *code,
            Error::Serialization { code, .. } => *code,
            Error::Internal { code, .. } => *code,
        }
    }

    /// Check if this is a client error.
    pub fn is_client_error(&self) -> bool {
        self.code().is_client_error()
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        self.code().is_server_error()
    }
}

// Convenience constructors

impl Error {
    /// Create an invalid-hash error.
    pub fn invalid_hash(message: impl Into<String>) -> Self {
        Error::Validation {
            code: ErrorCode::InvalidHash,
            message: message.into(),
        }
    }

    /// Create an invalid-key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Error::Validation {
            code: ErrorCode::InvalidKey,
            message: message.into(),
        }
    }

    /// Create an invalid-signature error.
    pub fn invalid_signature() -> Self {
        Error::InvalidSignature {
            code: ErrorCode::InvalidSignature,
        }
    }

    /// Create an invalid-transaction error.
    pub fn invalid_transaction(message: impl Into<String>) -> Self {
        Error::Validation {
            code: ErrorCode::InvalidTransaction,
            message: message.into(),
        }
    }

    /// Create an invalid-block error.
    pub fn invalid_block(message: impl Into<String>) -> Self {
        Error::Validation {
            code: ErrorCode::InvalidBlock,
            message: message.into(),
        }
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::Validation {
            code: ErrorCode::InvalidArgument,
            message: message.into(),
        }
    }

    /// Create a block-not-found error.
    pub fn block_not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            code: ErrorCode::BlockNotFound,
            message: message.into(),
        }
    }

    /// Create a duplicate-hash error.
    pub fn duplicate_hash(message: impl Into<String>) -> Self {
        Error::Duplicate {
            code: ErrorCode::DuplicateHash,
            message: message.into(),
        }
    }

    /// Create a delta-in-use error.
    pub fn delta_in_use() -> Self {
        Error::Duplicate {
            code: ErrorCode::DeltaInUse,
            message: "a cache delta is already outstanding".into(),
        }
    }

    /// Create a dispatcher-full error.
    pub fn dispatcher_full(name: impl Into<String>) -> Self {
        Error::Dispatcher {
            code: ErrorCode::DispatcherFull,
            message: format!("{} ring is full", name.into()),
        }
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::Dispatcher {
            code: ErrorCode::InvalidInput,
            message: message.into(),
        }
    }

    /// Create a shutdown error.
    pub fn shutdown() -> Self {
        Error::Dispatcher {
            code: ErrorCode::Shutdown,
            message: "dispatcher is shutting down".into(),
        }
    }

    /// Create a sync error with the given code.
    pub fn sync(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Sync {
            code,
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            code: ErrorCode::StorageRead,
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage-write error.
    pub fn storage_write(message: impl Into<String>) -> Self {
        Error::Storage {
            code: ErrorCode::StorageWrite,
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            code: ErrorCode::Internal,
            message: message.into(),
        }
    }
}

// From implementations for automatic conversion

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization {
            code: ErrorCode::Serialization,
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Storage {
            code: ErrorCode::StorageWrite,
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Validation {
            code: ErrorCode::InvalidHash,
            message: e.to_string(),
        }
    }
}
