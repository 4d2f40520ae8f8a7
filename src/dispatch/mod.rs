//! Send and retry state machine for post emails.

mod payload;
mod sender;
pub mod service;
pub mod verification;

use thiserror::Error;
use uuid::Uuid;

use crate::batch::PartitionError;
use crate::segment::FilterError;
use crate::storage::{EmailStatus, StorageError};

pub use payload::{build_payload, error_data, PreparedContent};
pub use service::{aggregate_status, DispatchSettings, EmailService, NewEmail, RecoveryReport};
pub use verification::VerificationGate;

/// Input problems caught before anything is persisted or sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("email subject is required")]
    MissingSubject,

    #[error("email body is required")]
    MissingBody,

    #[error("from address is required")]
    MissingFrom,

    #[error("invalid recipient filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("audience verification required: {recent} members added recently, threshold is {threshold}")]
    VerificationRequired { recent: u64, threshold: u64 },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("email {0} not found")]
    EmailNotFound(Uuid),

    #[error("email {email_id} is {status}, expected {expected}")]
    InvalidState {
        email_id: Uuid,
        status: EmailStatus,
        expected: EmailStatus,
    },

    #[error("failed to partition recipients: {0}")]
    Partition(#[from] PartitionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
