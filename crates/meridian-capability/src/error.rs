//! Capability registry error types.

use thiserror::Error;

use crate::schema::FeatureKind;

/// Result type alias for capability operations.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Errors raised while validating or publishing capability documents.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability {field} '{value}' {reason}")]
    InvalidIdentifier {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("{document}: unknown feature key '{feature}'")]
    UnknownFeature { document: String, feature: String },

    #[error("{document}: feature '{feature}' expects a {expected} value")]
    KindMismatch {
        document: String,
        feature: String,
        expected: FeatureKind,
    },

    #[error("capability document {identifier}@{version} is already published")]
    ImmutableVersion { identifier: String, version: String },

    #[error("capability document {identifier}@{version} not found")]
    NotFound { identifier: String, version: String },
}

impl CapabilityError {
    /// Whether this error describes a malformed document (as opposed to
    /// a conflict with registry state).
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. } | Self::UnknownFeature { .. } | Self::KindMismatch { .. }
        )
    }
}
