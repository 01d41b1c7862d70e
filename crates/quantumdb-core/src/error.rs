//! Core error types.

use thiserror::Error;

/// Errors raised by the schema evolution core.
///
/// Argument failures (`InvalidArgument`) are raised before any graph is
/// mutated. Structural failures (`IllegalState`, `NoPath`, `PlanInvalid`)
/// abort the current operation as a whole.
#[derive(Debug, Error)]
pub enum Error {
    /// A required argument was missing, empty or referred to something unknown.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the offending argument.
        message: String,
    },

    /// The requested change conflicts with the current structure.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of the conflict.
        message: String,
    },

    /// No path exists between two versions.
    #[error("no path from version {from} to version {to}")]
    NoPath {
        /// Version the path was requested from.
        from: String,
        /// Version the path was requested to.
        to: String,
    },

    /// A migration plan violates one of its ordering invariants.
    #[error("invalid migration plan: {message}")]
    PlanInvalid {
        /// The violated invariant.
        message: String,
    },

    /// The backend failed while applying part of a migration.
    #[error("backend failed during {operation}: {message}")]
    Backend {
        /// The backend call that failed.
        operation: String,
        /// The underlying failure.
        message: String,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Create an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an `IllegalState` error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Error::IllegalState {
            message: message.into(),
        }
    }

    /// Create a `PlanInvalid` error.
    pub fn plan_invalid(message: impl Into<String>) -> Self {
        Error::PlanInvalid {
            message: message.into(),
        }
    }

    /// Create a `Backend` error.
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether this error was caused by the caller passing bad input.
    pub fn is_argument_error(&self) -> bool {
        matches!(self, Error::InvalidArgument { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            Error::Deserialization(e.to_string())
        } else {
            Error::Serialization(e.to_string())
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Reject an empty identifier.
pub(crate) fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_argument(format!(
            "You must specify a '{}'.",
            field
        )));
    }
    Ok(())
}

/// Fail with `IllegalState` unless `condition` holds.
pub(crate) fn check_state(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::illegal_state(message()))
    }
}
