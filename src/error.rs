//! Error types for the reconciliation engine and the resources built on it.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors raised while validating, expanding, flattening, planning or talking
/// to the remote API.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A value failed a field constraint.
    #[error("Validation error: `{field}` {constraint}")]
    Validation {
        /// Path of the offending field.
        field: String,
        /// Human-readable description of the violated constraint.
        constraint: String,
    },

    /// More than one arm of an exactly-one-of group was set.
    #[error("Conflicting fields: only one of {} may be set", .fields.join(", "))]
    ConflictingFields {
        /// Paths of every populated arm.
        fields: Vec<String>,
    },

    /// A required field, or every arm of a required group, was unset.
    #[error("Missing field: {}", .fields.join(" or "))]
    MissingField {
        /// Paths of the candidates, any of which would satisfy the constraint.
        fields: Vec<String>,
    },

    /// Fields are individually valid but not together.
    #[error("Invalid combination: `{field}` {reason}")]
    InvalidCombination {
        /// Path of the field that cannot be combined.
        field: String,
        /// Why the combination is rejected.
        reason: String,
    },

    /// A polymorphic response carried a different discriminant than expected.
    #[error("Unexpected variant: expected {expected:?}, received {actual:?}")]
    UnexpectedVariant {
        /// The discriminant this resource manages.
        expected: String,
        /// The discriminant the API returned.
        actual: String,
    },

    /// A response field had a shape the schema cannot represent.
    #[error("Unexpected shape for `{field}`: expected {expected}, got {actual}")]
    UnexpectedShape {
        /// Path of the field.
        field: String,
        /// The schema type.
        expected: String,
        /// The JSON type that was returned.
        actual: String,
    },

    /// A resource identifier could not be parsed.
    #[error("Invalid resource id {input:?}: {reason}")]
    InvalidId {
        /// The raw identifier.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Resource already exists and must be imported instead of created.
    #[error("Resource already exists: {0} - to be managed it needs to be imported")]
    AlreadyExists(String),

    /// An in-place update was requested for a change that needs replacement.
    #[error("Requires replacement: {0}")]
    RequiresReplace(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// The provider configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Any other failure reported by the remote API.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Shorthand for [`ReconcileError::Validation`].
    pub fn validation(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
        }
    }

    /// Shorthand for a [`ReconcileError::MissingField`] naming a single field.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            fields: vec![field.into()],
        }
    }

    /// Whether a caller could reasonably retry the operation.
    ///
    /// The engine itself never retries; this only classifies errors coming back
    /// from the remote collaborator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::ResourceExhausted(_) | Self::DeadlineExceeded(_)
        )
    }

    /// Whether the error is a schema or input problem, reported before any
    /// remote call is made.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::ConflictingFields { .. }
                | Self::MissingField { .. }
                | Self::InvalidCombination { .. }
                | Self::InvalidId { .. }
        )
    }

    /// The attribute path the error refers to, if any.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. }
            | Self::InvalidCombination { field, .. }
            | Self::UnexpectedShape { field, .. } => Some(field),
            Self::ConflictingFields { fields } | Self::MissingField { fields } => {
                fields.first().map(String::as_str)
            },
            _ => None,
        }
    }
}

impl From<ReconcileError> for Diagnostic {
    fn from(err: ReconcileError) -> Self {
        let summary = match &err {
            ReconcileError::Validation { .. } => "Invalid attribute value",
            ReconcileError::ConflictingFields { .. } => "Conflicting attributes",
            ReconcileError::MissingField { .. } => "Missing required attribute",
            ReconcileError::InvalidCombination { .. } => "Invalid attribute combination",
            ReconcileError::UnexpectedVariant { .. } => "Unexpected resource variant",
            ReconcileError::UnexpectedShape { .. } => "Unexpected response shape",
            ReconcileError::InvalidId { .. } => "Invalid resource id",
            _ => "Provider error",
        };
        let diagnostic = Diagnostic::error(summary).with_detail(err.to_string());
        match err.attribute() {
            Some(path) => diagnostic.with_attribute(path),
            None => diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DiagnosticSeverity;

    #[test]
    fn test_error_display() {
        let err = ReconcileError::NotFound("budget-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: budget-123");

        let err = ReconcileError::validation("threshold", "must be between 0 and 1000, got 1001");
        assert_eq!(
            format!("{}", err),
            "Validation error: `threshold` must be between 0 and 1000, got 1001"
        );

        let err = ReconcileError::ConflictingFields {
            fields: vec!["filter.0.not.0.dimension".into(), "filter.0.not.0.tag".into()],
        };
        assert_eq!(
            format!("{}", err),
            "Conflicting fields: only one of filter.0.not.0.dimension, filter.0.not.0.tag may be set"
        );

        let err = ReconcileError::UnexpectedVariant {
            expected: "AzureSqlDW".into(),
            actual: "AzureBlobStorage".into(),
        };
        assert_eq!(
            format!("{}", err),
            "Unexpected variant: expected \"AzureSqlDW\", received \"AzureBlobStorage\""
        );
    }

    #[test]
    fn test_missing_field_display() {
        let err = ReconcileError::MissingField {
            fields: vec!["dimension".into(), "tag".into(), "not".into()],
        };
        assert_eq!(format!("{}", err), "Missing field: dimension or tag or not");
        assert_eq!(err.attribute(), Some("dimension"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ReconcileError::Unavailable("503".into()).is_retryable());
        assert!(ReconcileError::ResourceExhausted("429".into()).is_retryable());
        assert!(ReconcileError::DeadlineExceeded("read".into()).is_retryable());
        assert!(!ReconcileError::NotFound("x".into()).is_retryable());
        assert!(!ReconcileError::Remote("400".into()).is_retryable());
        assert!(!ReconcileError::missing("name").is_retryable());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(ReconcileError::missing("name").is_config_error());
        assert!(ReconcileError::validation("name", "must not be empty").is_config_error());
        assert!(!ReconcileError::Unavailable("503".into()).is_config_error());
    }

    #[test]
    fn test_error_to_diagnostic() {
        let diagnostic: Diagnostic =
            ReconcileError::validation("notification.0.threshold", "out of range").into();
        assert_eq!(diagnostic.severity, DiagnosticSeverity::Error);
        assert_eq!(diagnostic.summary, "Invalid attribute value");
        assert_eq!(
            diagnostic.attribute,
            Some("notification.0.threshold".to_string())
        );

        let diagnostic: Diagnostic = ReconcileError::Remote("boom".into()).into();
        assert_eq!(diagnostic.summary, "Provider error");
        assert!(diagnostic.attribute.is_none());
        assert_eq!(diagnostic.detail, Some("Remote error: boom".to_string()));
    }
}
