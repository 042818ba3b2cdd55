//! Error types for the reconciliation broker
//!
//! Errors are structured with fields so that every failure surfaced to a
//! caller names the resource kind and object it concerns.

use thiserror::Error;

/// Main error type for broker operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error not otherwise classified
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A Kubernetes API call on a specific object failed
    #[error("{operation} {kind} {name:?}: {source}")]
    Api {
        /// Operation attempted (get, create, update, ...)
        operation: String,
        /// Resource kind
        kind: String,
        /// Object name, or the selector for collection calls
        name: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Caller input failed validation
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "containers[0].name")
        field: Option<String>,
    },

    /// The named object does not exist in the cluster
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Resource kind (e.g., "StatefulSet")
        kind: String,
        /// Object name
        name: String,
    },

    /// The named object already exists in the cluster
    #[error("{kind} {name:?} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// A wait was cancelled before its condition was observed
    #[error("cancelled while {context}")]
    Cancelled {
        /// What was being waited on
        context: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Operation or resource the error occurred in
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Wrap a kube-rs error with the operation and object it concerns
    pub fn api(
        operation: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::Api {
            operation: operation.into(),
            kind: kind.into(),
            name: name.into(),
            source,
        }
    }

    /// Create a not-found error for a resource kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for a resource kind and name
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
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

    /// Create a cancellation error describing what was interrupted
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error means the target object is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube {
                source: kube::Error::Api(e),
            }
            | Self::Api {
                source: kube::Error::Api(e),
                ..
            } => e.code == 404,
            _ => false,
        }
    }

    /// Whether this error means the target object already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Kube {
                source: kube::Error::Api(e),
            }
            | Self::Api {
                source: kube::Error::Api(e),
                ..
            } => e.code == 409 && e.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// Whether this error came from a cancelled wait
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Story: teardown paths treat a missing object as success
    ///
    /// The broker asks `is_not_found` on every delete result, so both the
    /// dedicated variant and a raw 404 from the API must classify the same.
    #[test]
    fn story_not_found_is_recognised_in_both_shapes() {
        assert!(Error::not_found("Secret", "app-secret").is_not_found());
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(!api_error(500, "InternalError").is_not_found());
        assert!(!Error::cancelled("waiting").is_not_found());
    }

    #[test]
    fn api_errors_name_operation_and_object() {
        let err = Error::api(
            "update",
            "StatefulSet",
            "app",
            kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "forbidden".to_string(),
                reason: "Forbidden".to_string(),
                code: 403,
            }),
        );
        assert!(err.to_string().starts_with("update StatefulSet \"app\""));
        assert!(!err.is_not_found());
    }

    #[test]
    fn already_exists_requires_conflict_reason() {
        assert!(Error::already_exists("Namespace", "test").is_already_exists());
        assert!(api_error(409, "AlreadyExists").is_already_exists());
        assert!(!api_error(409, "Conflict").is_already_exists());
    }

    #[test]
    fn messages_name_kind_and_object() {
        let err = Error::not_found("ConfigMap", "test-operator-config");
        assert_eq!(
            err.to_string(),
            "ConfigMap \"test-operator-config\" not found"
        );

        let err = Error::cancelled("waiting for namespace \"test\" to terminate");
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("namespace \"test\""));
    }

    #[test]
    fn validation_carries_field_path() {
        match Error::validation_for_field("containers", "require at least one container spec") {
            Error::Validation { field, message } => {
                assert_eq!(field.as_deref(), Some("containers"));
                assert_eq!(message, "require at least one container spec");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
