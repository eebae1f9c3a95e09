//! Expansion error types.
//!
//! All errors in the `libexpand` crate are represented by the [`ExpandError`]
//! enum, which derives [`thiserror::Error`].  The operation layer reports its
//! three outcome classes through `Result<bool, ExpandError>`:
//!
//! * `Ok(true)`: the request is finished (or there was nothing to do);
//! * `Ok(false)`: non-final, the grow needs a later lifecycle phase;
//! * `Err(_)`: failure.  Transient ones ([`ExpandError::is_transient`]) are
//!   retried on the next reconciler tick; any other ends the request after
//!   a single warning event.

use thiserror::Error;

/// Unified error type for expansion operations.
#[derive(Debug, Error, Clone)]
pub enum ExpandError {
    /// The claim does not exist in the remote store.
    #[error("claim {0} not found")]
    ClaimNotFound(String),

    /// The persistent volume does not exist in the remote store.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// The object changed underneath an optimistic patch.
    #[error("conflict patching {name}: expected resourceVersion {expected}, found {found}")]
    Conflict {
        /// `namespace/name` (claims) or name (volumes) of the object.
        name: String,
        /// The resourceVersion the patch was computed against.
        expected: String,
        /// The resourceVersion currently stored.
        found: String,
    },

    /// The remote store rejected or failed a call.
    #[error("api error: {0}")]
    Api(String),

    /// Marshalling an object or patch failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A quantity string could not be parsed.
    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),

    /// A volume plugin (expander / node expander) failed.
    #[error("plugin error: {0}")]
    Plugin(String),

    /// A required field was absent from an object.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// An operation for this key is already running.
    #[error("operation for {0} is already in progress")]
    AlreadyExists(String),

    /// The operation panicked; the panic was recovered by the tracker.
    #[error("operation {operation} panicked: {message}")]
    Panicked {
        /// Name of the operation that panicked.
        operation: String,
        /// Panic payload, if it was a string.
        message: String,
    },
}

impl ExpandError {
    /// Create an [`ExpandError::Api`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn api<E: std::fmt::Display>(e: E) -> Self {
        Self::Api(e.to_string())
    }

    /// Create an [`ExpandError::Serialization`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    /// Create an [`ExpandError::Plugin`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn plugin<E: std::fmt::Display>(e: E) -> Self {
        Self::Plugin(e.to_string())
    }

    /// Prefix the error message with `context`, keeping the variant when the
    /// variant carries no free-form text.
    pub fn context(self, context: &str) -> Self {
        match self {
            Self::Api(msg) => Self::Api(format!("{context}: {msg}")),
            Self::Plugin(msg) => Self::Plugin(format!("{context}: {msg}")),
            Self::Serialization(msg) => Self::Serialization(format!("{context}: {msg}")),
            other => other,
        }
    }

    /// Whether retrying on a later tick can change the outcome.
    ///
    /// Remote-store failures, conflicts and plugin failures are transient.
    /// Malformed input and recovered panics are not: the next attempt would
    /// see the same object and fail the same way.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ClaimNotFound(_)
                | Self::VolumeNotFound(_)
                | Self::Conflict { .. }
                | Self::Api(_)
                | Self::Plugin(_)
                | Self::AlreadyExists(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ExpandError::ClaimNotFound("default/data".into());
        assert_eq!(err.to_string(), "claim default/data not found");

        let err = ExpandError::Conflict {
            name: "default/data".into(),
            expected: "3".into(),
            found: "4".into(),
        };
        assert_eq!(
            err.to_string(),
            "conflict patching default/data: expected resourceVersion 3, found 4"
        );
    }

    #[test]
    fn context_prefixes_message() {
        let err = ExpandError::api("connection reset").context("get claim");
        assert_eq!(err.to_string(), "api error: get claim: connection reset");

        let err = ExpandError::MissingField(".spec.claimRef").context("ignored");
        assert!(matches!(err, ExpandError::MissingField(_)));
    }

    #[test]
    fn transient_classification() {
        assert!(ExpandError::api("timeout").is_transient());
        assert!(
            ExpandError::Conflict {
                name: "a".into(),
                expected: "1".into(),
                found: "2".into(),
            }
            .is_transient()
        );
        assert!(!ExpandError::InvalidQuantity("10Qi".into()).is_transient());
        assert!(
            !ExpandError::Panicked {
                operation: "expand_volume".into(),
                message: "boom".into(),
            }
            .is_transient()
        );
    }
}
