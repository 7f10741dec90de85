//! Error types for replication processing.
//!
//! Errors are plain values carrying a classification (`ErrorKind`) and the
//! side of the transfer they came from (`ErrorOrigin`). The retry runner and
//! the task's outcome handling branch on these fields instead of matching on
//! error strings.

use thiserror::Error;

/// A specialized `Result` type for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Classification of a replication error.
///
/// Only `Transient` errors are retried; every other kind is terminal for the
/// current entry and decides whether the task publishes a FAILED status or
/// skips the entry silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network timeouts, 5xx responses, throttling. Retryable.
    Transient,
    /// Non-retryable failure reported by the source service
    /// (`NoSuchEntity`, `AccessDenied`, `BadRole`). The entry is skipped.
    PermanentSource,
    /// The source object is missing.
    ObjNotFound,
    /// The source content changed mid-transfer, the site already completed,
    /// or a replication precondition failed. The entry is skipped without a
    /// FAILED publication.
    InvalidObjectState,
    /// Non-retryable failure reported by the destination. The task publishes
    /// a FAILED site status.
    PermanentTarget,
    /// The log record could not be decoded into an entry. Logged and dropped.
    Malformed,
    /// An internal invariant was violated (for example a part location with
    /// no data-store ETag). Treated as terminal; publishes FAILED.
    Internal,
}

impl ErrorKind {
    /// Returns the wire/error-code name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "Transient",
            Self::PermanentSource => "PermanentSource",
            Self::ObjNotFound => "ObjNotFound",
            Self::InvalidObjectState => "InvalidObjectState",
            Self::PermanentTarget => "PermanentTarget",
            Self::Malformed => "MalformedEntry",
            Self::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which side of the transfer produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorOrigin {
    /// The source object service.
    Source,
    /// The destination (cross-backend) service.
    Target,
    /// Raised inside the worker itself.
    #[default]
    Local,
}

impl std::fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// An error raised while replicating one log entry.
#[derive(Debug, Clone, Error)]
#[error("{kind} ({origin}): {message}")]
pub struct ReplicationError {
    /// Classification used for retry and outcome decisions.
    pub kind: ErrorKind,
    /// The side of the transfer the error came from.
    pub origin: ErrorOrigin,
    /// Human-readable description.
    pub message: String,
}

impl ReplicationError {
    /// Creates an error of the given kind and origin.
    #[must_use]
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self { kind, origin, message: message.into() }
    }

    /// A retryable error (network, 5xx, throttling).
    #[must_use]
    pub fn transient(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, origin, message)
    }

    /// A non-retryable source-side failure.
    #[must_use]
    pub fn permanent_source(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentSource, ErrorOrigin::Source, message)
    }

    /// A non-retryable destination-side failure.
    #[must_use]
    pub fn permanent_target(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentTarget, ErrorOrigin::Target, message)
    }

    /// The source object (or destination replica) does not exist.
    #[must_use]
    pub fn obj_not_found(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ObjNotFound, origin, message)
    }

    /// The object's state no longer permits this replication.
    #[must_use]
    pub fn invalid_object_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidObjectState, ErrorOrigin::Local, message)
    }

    /// The log record could not be parsed.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, ErrorOrigin::Local, message)
    }

    /// An internal invariant violation.
    #[must_use]
    pub fn internal(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, origin, message)
    }

    /// Whether the retry runner may re-attempt the failed call.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient)
    }

    /// Whether the source object was reported missing.
    #[must_use]
    pub const fn is_obj_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::ObjNotFound)
    }

    /// Whether the task should publish a FAILED site status for this error.
    ///
    /// Skipped kinds (`PermanentSource`, `ObjNotFound`, `InvalidObjectState`,
    /// `Malformed`) never surface as FAILED; everything else that reaches the
    /// outcome handler does.
    #[must_use]
    pub const fn publishes_failure(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient | ErrorKind::PermanentTarget | ErrorKind::Internal)
    }
}

impl From<serde_json::Error> for ReplicationError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}
