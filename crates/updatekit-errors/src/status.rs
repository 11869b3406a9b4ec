//! The status taxonomy shared by storage, verification and the update service.
//!
//! Each variant carries a human-readable context message. Callers branch on
//! [`UpdateError::kind`], never on the message text.

use core::fmt;

/// Top-level error type for every UpdateKit operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    /// Bad caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation is not valid in the current state (not open, not verified, ...)
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Transient backpressure; the caller may retry later
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Terminal exhaustion of a stream or of the blob capacity
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Unrecoverable write or integrity failure; the data must be re-created
    #[error("Data loss: {0}")]
    DataLoss(String),

    /// Cryptographic or anti-rollback verification failure
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Missing key, target, signature set or stored record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource is held by another reader or writer
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Backend hook not provided
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Broken internal invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UpdateError {
    /// Create an [`UpdateError::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an [`UpdateError::FailedPrecondition`].
    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    /// Create an [`UpdateError::ResourceExhausted`].
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create an [`UpdateError::OutOfRange`].
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Create an [`UpdateError::DataLoss`].
    pub fn data_loss(msg: impl Into<String>) -> Self {
        Self::DataLoss(msg.into())
    }

    /// Create an [`UpdateError::Unauthenticated`].
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    /// Create an [`UpdateError::NotFound`].
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an [`UpdateError::Unavailable`].
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an [`UpdateError::Unimplemented`].
    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::Unimplemented(msg.into())
    }

    /// Create an [`UpdateError::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match kind {
            ErrorKind::InvalidArgument => Self::InvalidArgument(msg),
            ErrorKind::FailedPrecondition => Self::FailedPrecondition(msg),
            ErrorKind::ResourceExhausted => Self::ResourceExhausted(msg),
            ErrorKind::OutOfRange => Self::OutOfRange(msg),
            ErrorKind::DataLoss => Self::DataLoss(msg),
            ErrorKind::Unauthenticated => Self::Unauthenticated(msg),
            ErrorKind::NotFound => Self::NotFound(msg),
            ErrorKind::Unavailable => Self::Unavailable(msg),
            ErrorKind::Unimplemented => Self::Unimplemented(msg),
            ErrorKind::Internal => Self::Internal(msg),
        }
    }

    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::OutOfRange(_) => ErrorKind::OutOfRange,
            Self::DataLoss(_) => ErrorKind::DataLoss,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Unimplemented(_) => ErrorKind::Unimplemented,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The context message carried by this error.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(m)
            | Self::FailedPrecondition(m)
            | Self::ResourceExhausted(m)
            | Self::OutOfRange(m)
            | Self::DataLoss(m)
            | Self::Unauthenticated(m)
            | Self::NotFound(m)
            | Self::Unavailable(m)
            | Self::Unimplemented(m)
            | Self::Internal(m) => m,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ResourceExhausted | ErrorKind::Unavailable
        )
    }

    /// Check whether this error is of the given kind.
    #[inline]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    /// Prefix the message with an operation name, keeping the kind.
    pub fn with_operation(self, operation: impl fmt::Display) -> Self {
        let msg = format!("{operation}: {}", self.message());
        Self::new(self.kind(), msg)
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match e.kind() {
            Io::NotFound => ErrorKind::NotFound,
            Io::InvalidInput => ErrorKind::InvalidArgument,
            Io::InvalidData => ErrorKind::DataLoss,
            Io::UnexpectedEof => ErrorKind::OutOfRange,
            Io::WouldBlock => ErrorKind::ResourceExhausted,
            Io::PermissionDenied => ErrorKind::FailedPrecondition,
            Io::Unsupported => ErrorKind::Unimplemented,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, format!("I/O error: {e}"))
    }
}

/// Classification of an [`UpdateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// Bad caller input
    InvalidArgument = 3,
    /// Operation invalid in the current state
    FailedPrecondition = 9,
    /// Transient backpressure
    ResourceExhausted = 8,
    /// Terminal exhaustion
    OutOfRange = 11,
    /// Unrecoverable data failure
    DataLoss = 15,
    /// Verification failure
    Unauthenticated = 16,
    /// Missing item
    NotFound = 5,
    /// Lock contention
    Unavailable = 14,
    /// Hook not provided
    Unimplemented = 12,
    /// Internal invariant broken
    Internal = 13,
}

impl ErrorKind {
    /// Canonical upper-case name, as used in logs and status notes.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::OutOfRange => "OUT_OF_RANGE",
            ErrorKind::DataLoss => "DATA_LOSS",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Unimplemented => "UNIMPLEMENTED",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Numeric status code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extension trait for adding operation context to fallible results.
pub trait ResultExt<T> {
    /// Prefix any error with `operation`, keeping its kind.
    fn with_operation(self, operation: &str) -> Result<T, UpdateError>;

    /// Replace the kind of any error, keeping its message.
    fn map_kind(self, kind: ErrorKind) -> Result<T, UpdateError>;
}

impl<T, E: Into<UpdateError>> ResultExt<T> for Result<T, E> {
    fn with_operation(self, operation: &str) -> Result<T, UpdateError> {
        self.map_err(|e| e.into().with_operation(operation))
    }

    fn map_kind(self, kind: ErrorKind) -> Result<T, UpdateError> {
        self.map_err(|e| {
            let err: UpdateError = e.into();
            UpdateError::new(kind, err.message())
        })
    }
}
