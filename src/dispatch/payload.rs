use serde_json::json;
use std::collections::BTreeMap;

use crate::provider::{BatchPayload, EmailProvider, ProviderError};
use crate::recipients::MergeFields;
use crate::render::links::unsubscribe_url;
use crate::render::replacements::{apply_placeholders, recipient_values};
use crate::render::{parse_replacements, RenderedContent, Replacement, ReplacementFormat};
use crate::storage::{EmailBatchRecord, EmailRecipientRecord, EmailRecord};

const UNSUBSCRIBE_KEY: &str = "list_unsubscribe";
const BULK_TAG: &str = "bulk-email";

/// A segment's rendering plus the personalization tokens found in it.
#[derive(Debug, Clone)]
pub struct PreparedContent {
    pub content: RenderedContent,
    pub replacements: Vec<Replacement>,
}

impl From<RenderedContent> for PreparedContent {
    fn from(content: RenderedContent) -> Self {
        let replacements = parse_replacements(&content.html, &content.plaintext);
        Self {
            content,
            replacements,
        }
    }
}

pub fn build_payload(
    email: &EmailRecord,
    batch: &EmailBatchRecord,
    prepared: &PreparedContent,
    recipients: &[EmailRecipientRecord],
    provider: &dyn EmailProvider,
    site_url: &str,
) -> BatchPayload {
    let placeholder = |key: &str| provider.recipient_variable(key);

    let html = apply_placeholders(
        &prepared.content.html,
        ReplacementFormat::Html,
        &prepared.replacements,
        placeholder,
    );
    let plaintext = apply_placeholders(
        &prepared.content.plaintext,
        ReplacementFormat::Plaintext,
        &prepared.replacements,
        placeholder,
    );

    let mut recipient_variables = BTreeMap::new();
    for r in recipients {
        let fields = MergeFields {
            uuid: r.member_uuid,
            email: r.member_email.clone(),
            name: r.member_name.clone(),
        };
        let mut values = recipient_values(&prepared.replacements, &fields);
        values.insert(
            UNSUBSCRIBE_KEY.to_string(),
            unsubscribe_url(site_url, Some(r.member_uuid), email.newsletter_id),
        );
        recipient_variables.insert(r.member_email.clone(), values);
    }

    let mut headers = BTreeMap::new();
    headers.insert(
        "List-Unsubscribe".to_string(),
        format!("<{}>", provider.recipient_variable(UNSUBSCRIBE_KEY)),
    );
    headers.insert(
        "List-Unsubscribe-Post".to_string(),
        "List-Unsubscribe=One-Click".to_string(),
    );

    BatchPayload {
        batch_id: batch.id,
        email_id: email.id,
        from: email.from.clone(),
        reply_to: email.reply_to.clone(),
        subject: email.subject.clone(),
        html,
        plaintext,
        recipients: recipients.iter().map(|r| r.member_email.clone()).collect(),
        recipient_variables,
        headers,
        tags: vec![BULK_TAG.to_string()],
    }
}

/// Structured error stored on a failed batch.
pub fn error_data(error: &ProviderError, payload: &BatchPayload) -> serde_json::Value {
    json!({
        "error": {
            "status": error.status_code,
            "message": error.message,
            "details": error.detail,
        },
        "messageData": {
            "to": payload.recipients,
            "batchId": payload.batch_id,
        }
    })
}
