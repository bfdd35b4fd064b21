//! Error types for the session engine.

use crate::commands::CommandType;
use crate::transport::TransportError;
use std::fmt;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// What the session did to a document that also has a deferred command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictingAction {
    /// The session is deleting the document.
    Deleted,
    /// The session is writing a modified version of the document.
    Modified,
}

impl fmt::Display for ConflictingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deleted => f.write_str("deleted"),
            Self::Modified => f.write_str("modified"),
        }
    }
}

/// Broad classification of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller used the session in a way it does not allow.
    InvalidUsage,
    /// An argument passed to an accessor was empty or unknown.
    InvalidArgument,
    /// A collaborator (transport, mapper) reported a failure.
    External,
}

/// Errors that can occur in session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation not permitted in the current session state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// An argument was null, empty or otherwise unusable.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the bad argument.
        message: String,
    },

    /// Two different entity instances were associated with one id.
    #[error("attempted to associate a different object with id '{id}'")]
    NonUniqueObject {
        /// The contested document id.
        id: String,
    },

    /// Metadata was requested for an instance the session does not track.
    #[error("document {id} doesn't exist in the session")]
    DocumentNotInSession {
        /// Id extracted from the instance.
        id: String,
    },

    /// A session-derived command collides with a deferred command.
    #[error(
        "cannot perform save because document {id} has been {action} by the session \
         and is also taking part in deferred {command_type} command"
    )]
    DeferredCommandConflict {
        /// The document both commands target.
        id: String,
        /// Type of the deferred command.
        command_type: CommandType,
        /// What the session was doing with the document.
        action: ConflictingAction,
    },

    /// The per-session request ceiling has been passed.
    #[error(
        "the maximum number of requests ({max}) allowed for this session has been reached; \
         sessions are expected to be short lived, batch loads and save once"
    )]
    RequestBudgetExceeded {
        /// Configured ceiling.
        max: u32,
    },

    /// A tracked document arrived without a concurrency token.
    #[error("document {id} must have a change vector")]
    MissingChangeVector {
        /// The offending document id.
        id: String,
    },

    /// A required collaborator hook has no implementation.
    #[error("not implemented: {message}")]
    NotImplemented {
        /// Description of the missing hook.
        message: String,
    },

    /// The session was disposed.
    #[error("session has been disposed")]
    Disposed,

    /// Entity/document marshalling failed.
    #[error("mapping error: {message}")]
    Mapping {
        /// Description of the failure.
        message: String,
    },

    /// The transport collaborator failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a not implemented error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Creates a mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
        }
    }

    /// Creates a deferred command conflict error.
    pub fn deferred_conflict(
        id: impl Into<String>,
        command_type: CommandType,
        action: ConflictingAction,
    ) -> Self {
        Self::DeferredCommandConflict {
            id: id.into(),
            command_type,
            action,
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument { .. } | Self::DocumentNotInSession { .. } => {
                ErrorCategory::InvalidArgument
            }
            Self::Mapping { .. } | Self::Transport(_) => ErrorCategory::External,
            _ => ErrorCategory::InvalidUsage,
        }
    }

    /// Returns true if retrying the same call could succeed.
    ///
    /// Local failures never are; transport failures defer to the transport.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::mapping(err.to_string())
    }
}
