//! Converge error type.

use hwm_client::ClientError;
use hwm_reconcile::{ReconcileError, RetryError};
use thiserror::Error;

use crate::bootstrap::BootstrapState;

/// Failures surfaced to the caller of a reconciliation or bootstrap run.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Reference resolution or batch validation failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// The appliance rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The appliance rejected or failed a request.
    #[error("remote request failed: {0}")]
    Remote(ClientError),

    /// A retried operation kept failing with transient errors.
    #[error("{operation} did not succeed after {attempts} attempts: {last}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        last: ClientError,
    },

    /// The caller's configuration cannot be applied as given.
    #[error("invalid desired state: {0}")]
    InvalidDesiredState(String),

    /// The requested state is not implemented for this resource kind.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A bootstrap step failed; `state` is where the workflow stopped.
    #[error("bootstrap failed while {state}: {source}")]
    Bootstrap {
        state: BootstrapState,
        #[source]
        source: Box<ConvergeError>,
    },

    /// The appliance answered with a document of an unexpected shape.
    #[error("unexpected response from appliance: {0}")]
    UnexpectedRecord(String),

    /// Management-controller discovery failed.
    #[error("hardware discovery failed: {0}")]
    Discovery(String),
}

impl ConvergeError {
    /// Convert the result of a retried call, naming the operation.
    pub fn from_retry(operation: &'static str, err: RetryError<ClientError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => Self::Exhausted {
                operation,
                attempts,
                last,
            },
            RetryError::Fatal(err) => err.into(),
        }
    }

    /// Stable identifier for the error class, reported alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Reconcile(ReconcileError::ReferenceNotFound { .. }) => "reference_not_found",
            Self::Reconcile(ReconcileError::AmbiguousMatch { .. }) => "ambiguous_match",
            Self::Reconcile(ReconcileError::DuplicateTarget { .. }) => "invalid_desired_state",
            Self::Auth(_) => "auth_failure",
            Self::Remote(_) | Self::UnexpectedRecord(_) => "remote_request_failure",
            Self::Exhausted { .. } => "retry_exhausted",
            Self::InvalidDesiredState(_) => "invalid_desired_state",
            Self::Unsupported(_) => "unsupported",
            Self::Bootstrap { source, .. } => source.code(),
            Self::Discovery(_) => "discovery_failure",
        }
    }
}

impl From<ClientError> for ConvergeError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Auth(message) => Self::Auth(message),
            other => Self::Remote(other),
        }
    }
}
