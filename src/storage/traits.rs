use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::member::Member;
use crate::render::Visibility;
use crate::segment::SegmentKey;

/// Lifecycle of an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Pending,
    Submitting,
    Submitted,
    Failed,
}

/// Lifecycle of a batch. `Sending` is held by the single worker that claimed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Sending,
    Submitted,
    Failed,
}

macro_rules! status_strings {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = StorageError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(StorageError::InvalidData(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

status_strings!(EmailStatus {
    Pending => "pending",
    Submitting => "submitting",
    Submitted => "submitted",
    Failed => "failed",
});

status_strings!(BatchStatus {
    Pending => "pending",
    Sending => "sending",
    Submitted => "submitted",
    Failed => "failed",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: Uuid,
    pub post_id: String,
    pub newsletter_id: Option<Uuid>,
    pub subject: String,
    pub from: String,
    pub reply_to: Option<String>,
    pub html: String,
    pub visibility: Option<Visibility>,
    /// Empty means every subscribed member.
    pub recipient_filter: String,
    /// Members created after this instant are never part of the email.
    pub snapshot_at: DateTime<Utc>,
    pub status: EmailStatus,
    pub email_count: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailBatchRecord {
    pub id: Uuid,
    pub email_id: Uuid,
    /// `None` for the universal rendering.
    pub segment: Option<String>,
    /// Scoped expressions every recipient of the batch matches.
    #[serde(default)]
    pub scoped_segments: Vec<String>,
    pub chunk_index: u32,
    pub provider_id: Option<String>,
    pub status: BatchStatus,
    pub error_status_code: Option<u16>,
    pub error_message: Option<String>,
    pub error_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailBatchRecord {
    /// The rendering this batch is sent with.
    pub fn segment_key(&self) -> SegmentKey {
        SegmentKey::new(self.segment.as_deref(), &self.scoped_segments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecipientRecord {
    pub id: Uuid,
    pub email_id: Uuid,
    pub batch_id: Uuid,
    pub member_id: Uuid,
    pub member_uuid: Uuid,
    pub member_email: String,
    pub member_name: Option<String>,
}

/// A batch and its recipients, written together.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub batch: EmailBatchRecord,
    pub recipients: Vec<EmailRecipientRecord>,
}

/// Error details recorded on a failed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub status_code: Option<u16>,
    pub message: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    // Members

    /// Inserts members in one transaction. Fails with `Conflict` when an
    /// address (compared case-insensitively) is already taken or repeated.
    async fn insert_members(&self, members: &[Member]) -> Result<(), StorageError>;

    /// Members created at or before `snapshot`, ordered by id.
    async fn list_members_created_before(
        &self,
        snapshot: DateTime<Utc>,
    ) -> Result<Vec<Member>, StorageError>;

    async fn count_members_created_since(&self, since: DateTime<Utc>) -> Result<u64, StorageError>;

    // Emails

    async fn insert_email(&self, email: &EmailRecord) -> Result<(), StorageError>;

    async fn get_email(&self, id: Uuid) -> Result<Option<EmailRecord>, StorageError>;

    /// Emails in `status`, oldest first.
    async fn list_emails(&self, status: EmailStatus) -> Result<Vec<EmailRecord>, StorageError>;

    /// Moves the email from `from` to `submitting`. Returns false when the
    /// email was not in state `from`.
    async fn claim_email(&self, id: Uuid, from: EmailStatus) -> Result<bool, StorageError>;

    async fn set_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        error: Option<String>,
    ) -> Result<(), StorageError>;

    /// Fails every `sending` batch and `submitting` email left behind by a
    /// process that stopped mid-send, along with the still `pending` batches
    /// of those emails. Returns the ids of the affected emails.
    async fn reset_interrupted(&self) -> Result<Vec<Uuid>, StorageError>;

    // Batches

    /// Writes every batch and its recipients, and sets the email's recipient
    /// count, in one transaction.
    async fn create_batches(&self, email_id: Uuid, batches: &[NewBatch]) -> Result<(), StorageError>;

    /// Batches of an email ordered by segment then chunk index.
    async fn list_batches(&self, email_id: Uuid) -> Result<Vec<EmailBatchRecord>, StorageError>;

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<EmailBatchRecord>, StorageError>;

    async fn list_recipients(
        &self,
        email_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<EmailRecipientRecord>, StorageError>;

    /// Moves a batch from one of `from` to `sending`. Returns false if another
    /// writer got there first.
    async fn claim_batch(&self, batch_id: Uuid, from: &[BatchStatus]) -> Result<bool, StorageError>;

    async fn mark_batch_submitted(&self, batch_id: Uuid, provider_id: &str) -> Result<(), StorageError>;

    async fn mark_batch_failed(&self, batch_id: Uuid, failure: &BatchFailure) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}
