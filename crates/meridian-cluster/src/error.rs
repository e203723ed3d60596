//! Coordinator and worker-client error types.

use meridian_capability::CapabilityError;
use meridian_state::StateError;
use thiserror::Error;

use crate::proto::ApiError;

/// Result type alias for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors returned by coordinator operations. Every message names the
/// offending worker, resource, or document.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid capability for {entity}: {message}")]
    InvalidCapability { entity: String, message: String },

    #[error("worker {worker_id} is not registered")]
    UnknownWorker { worker_id: String },

    #[error("resource {name} already exists")]
    AlreadyExists { name: String },

    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("worker {worker} cannot serve resource {resource}: missing {}", .missing_features.join(", "))]
    NoCapableWorker {
        resource: String,
        worker: String,
        missing_features: Vec<String>,
    },

    #[error("no worker owns partition {partition} for resource {resource}; retry in {retry_after_ms}ms")]
    RingExhausted {
        resource: String,
        partition: u16,
        retry_after_ms: u64,
    },

    #[error("capability document {identifier}@{version} is already published")]
    ImmutableVersion { identifier: String, version: String },

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl CoordinatorError {
    /// Stable machine-readable code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCapability { .. } => "invalid_capability",
            Self::UnknownWorker { .. } => "unknown_worker",
            Self::AlreadyExists { .. } => "already_exists",
            Self::NotFound { .. } => "not_found",
            Self::NoCapableWorker { .. } => "no_capable_worker",
            Self::RingExhausted { .. } => "ring_exhausted",
            Self::ImmutableVersion { .. } => "immutable_version",
            Self::InvalidName { .. } => "invalid_name",
            Self::State(_) => "internal",
        }
    }

    /// The entity the error is about.
    pub fn entity(&self) -> Option<String> {
        match self {
            Self::InvalidCapability { entity, .. } | Self::NotFound { entity } => {
                Some(entity.clone())
            }
            Self::UnknownWorker { worker_id } => Some(worker_id.clone()),
            Self::AlreadyExists { name } | Self::InvalidName { name, .. } => Some(name.clone()),
            Self::NoCapableWorker { resource, .. } | Self::RingExhausted { resource, .. } => {
                Some(resource.clone())
            }
            Self::ImmutableVersion {
                identifier,
                version,
            } => Some(format!("{identifier}@{version}")),
            Self::State(_) => None,
        }
    }

    /// Convert a capability registry error raised while handling `entity`.
    pub fn from_capability(entity: &str, err: CapabilityError) -> Self {
        match err {
            CapabilityError::ImmutableVersion {
                identifier,
                version,
            } => Self::ImmutableVersion {
                identifier,
                version,
            },
            CapabilityError::NotFound {
                identifier,
                version,
            } => Self::NotFound {
                entity: format!("capability document {identifier}@{version}"),
            },
            other => Self::InvalidCapability {
                entity: entity.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<&CoordinatorError> for ApiError {
    fn from(err: &CoordinatorError) -> Self {
        let (missing_features, retry_after_ms) = match err {
            CoordinatorError::NoCapableWorker {
                missing_features, ..
            } => (missing_features.clone(), None),
            CoordinatorError::RingExhausted { retry_after_ms, .. } => {
                (Vec::new(), Some(*retry_after_ms))
            }
            _ => (Vec::new(), None),
        };
        ApiError {
            code: err.code().to_string(),
            message: err.to_string(),
            entity: err.entity(),
            missing_features,
            retry_after_ms,
        }
    }
}

/// Result type alias for worker-side client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors seen by a worker talking to the coordinator.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("coordinator rejected request: {0}")]
    Coordinator(ApiError),

    #[error("transport error talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("failed to decode coordinator response: {0}")]
    Decode(String),

    #[error("worker {0} has not registered with the coordinator")]
    NotRegistered(String),
}

impl ClientError {
    /// The coordinator's error code, if the coordinator answered.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Coordinator(e) => Some(&e.code),
            _ => None,
        }
    }

    /// The coordinator no longer knows this worker (evicted, stale, or
    /// restarted); the worker must re-register.
    pub fn requires_registration(&self) -> bool {
        matches!(self, Self::NotRegistered(_)) || self.code() == Some("unknown_worker")
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<CoordinatorError> for ClientError {
    fn from(err: CoordinatorError) -> Self {
        Self::Coordinator(ApiError::from(&err))
    }
}
