//! Bulk-mail provider interface

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Everything needed for one bulk-send call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchPayload {
    pub batch_id: Uuid,
    pub email_id: Uuid,
    pub from: String,
    pub reply_to: Option<String>,
    pub subject: String,
    /// Body with provider-native placeholders.
    pub html: String,
    pub plaintext: String,
    /// Recipient email addresses.
    pub recipients: Vec<String>,
    /// Per-recipient placeholder values, keyed by email address.
    pub recipient_variables: BTreeMap<String, BTreeMap<String, String>>,
    pub headers: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderReceipt {
    /// Provider-assigned message id.
    pub id: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", self.full_message())]
pub struct ProviderError {
    pub status_code: Option<u16>,
    pub message: String,
    pub detail: Option<String>,
}

impl ProviderError {
    pub fn new(status_code: Option<u16>, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            detail,
        }
    }

    /// `"<message>: <detail>"`, or just the message when there is no detail.
    pub fn full_message(&self) -> String {
        match &self.detail {
            Some(detail) if !detail.is_empty() => format!("{}: {}", self.message, detail),
            _ => self.message.clone(),
        }
    }
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Largest number of recipients one `send` call accepts.
    fn batch_size(&self) -> usize;

    /// Placeholder the provider replaces with the recipient's value for `key`.
    fn recipient_variable(&self, key: &str) -> String {
        format!("%recipient.{}%", key)
    }

    async fn send(&self, payload: &BatchPayload) -> Result<ProviderReceipt, ProviderError>;
}
