//! Error types for topology reconciliation
//!
//! Errors are structured with fields so a single log line identifies the
//! object or extension involved. The variants follow the failure taxonomy the
//! controller acts on: missing references, invalid input, extension failures,
//! and write conflicts.

use thiserror::Error;

use crate::field::FieldErrorList;

/// Main error type for topology operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API (storage) error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A referenced object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Namespace that was searched
        namespace: String,
        /// Name of the missing object
        name: String,
    },

    /// Structural, schema or referential violation
    #[error("{kind} {name} is invalid: {errors}")]
    Invalid {
        /// Kind of the invalid object
        kind: String,
        /// Name of the invalid object
        name: String,
        /// Every violation found
        errors: FieldErrorList,
    },

    /// A runtime extension failed under the Fail policy
    #[error("extension {extension} failed {hook}: {message}")]
    Extension {
        /// Registration name of the extension
        extension: String,
        /// Hook that was being called
        hook: String,
        /// What went wrong
        message: String,
    },

    /// Optimistic concurrency conflict on write
    #[error("conflict writing {kind} {name}")]
    Conflict {
        /// Kind of the object being written
        kind: String,
        /// Name of the object being written
        name: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// A JSON patch could not be applied
    #[error("patch error for {target}: {message}")]
    Patch {
        /// Object the patch targeted
        target: String,
        /// Description of what failed
        message: String,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {message}")]
    Config {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g., "reconciler", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for a referenced object
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an invalid-object error from aggregated field errors
    pub fn invalid(
        kind: impl Into<String>,
        name: impl Into<String>,
        errors: FieldErrorList,
    ) -> Self {
        Self::Invalid {
            kind: kind.into(),
            name: name.into(),
            errors,
        }
    }

    /// Create an extension failure
    pub fn extension(
        extension: impl Into<String>,
        hook: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Extension {
            extension: extension.into(),
            hook: hook.into(),
            message: msg.into(),
        }
    }

    /// Create a write conflict error
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a patch application error
    pub fn patch(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Patch {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Map a kube write error, turning HTTP 409 into [`Error::Conflict`]
    pub fn from_write(kind: &str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::conflict(kind, name),
            other => Self::Kube { source: other },
        }
    }

    /// Whether the error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether retrying the same input could succeed
    ///
    /// Invalid input and configuration errors need a spec change first; every
    /// other failure may clear up on a later pass.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Invalid { .. } | Self::Config { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
