use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::payload::PreparedContent;
use super::sender::{send_batch, SendContext};
use super::{DispatchError, PreconditionError, VerificationGate};
use crate::batch::plan;
use crate::provider::EmailProvider;
use crate::recipients::RecipientResolver;
use crate::render::links::add_outbound_ref;
use crate::render::{render_for_key, Document, Visibility};
use crate::segment::{extract_segments, Filter, SegmentKey, SegmentSet};
use crate::storage::{
    BatchFailure, BatchStatus, EmailBatchRecord, EmailRecipientRecord, EmailRecord, EmailStatus,
    NewBatch, Storage,
};

/// Request to send a post to (part of) the audience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmail {
    pub post_id: String,
    #[serde(default)]
    pub newsletter_id: Option<Uuid>,
    pub subject: String,
    pub from: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    pub html: String,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    /// Empty sends to every subscribed member.
    #[serde(default)]
    pub recipient_filter: String,
}

impl NewEmail {
    fn validate(&self) -> Result<(), PreconditionError> {
        if self.subject.trim().is_empty() {
            return Err(PreconditionError::MissingSubject);
        }
        if self.html.trim().is_empty() {
            return Err(PreconditionError::MissingBody);
        }
        if self.from.trim().is_empty() {
            return Err(PreconditionError::MissingFrom);
        }
        Filter::parse(&self.recipient_filter)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub concurrency: usize,
    pub site_url: String,
    pub outbound_ref: bool,
}

impl DispatchSettings {
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            concurrency: 2,
            site_url: site_url.into(),
            outbound_ref: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_outbound_ref(mut self, enabled: bool) -> Self {
        self.outbound_ref = enabled;
        self
    }
}

/// Email status implied by the statuses of its batches.
pub fn aggregate_status<I>(statuses: I) -> EmailStatus
where
    I: IntoIterator<Item = BatchStatus>,
{
    let mut all_submitted = true;
    for status in statuses {
        match status {
            BatchStatus::Failed => return EmailStatus::Failed,
            BatchStatus::Submitted => {}
            BatchStatus::Pending | BatchStatus::Sending => all_submitted = false,
        }
    }
    if all_submitted {
        EmailStatus::Submitted
    } else {
        EmailStatus::Submitting
    }
}

/// What [`EmailService::recover`] found at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Emails whose in-flight work was marked failed. They need a retry.
    pub interrupted: Vec<Uuid>,
    /// Pending emails handed back to a background send.
    pub resumed: Vec<Uuid>,
}

pub struct EmailService {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn EmailProvider>,
    resolver: RecipientResolver,
    gate: VerificationGate,
    settings: DispatchSettings,
}

impl EmailService {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn EmailProvider>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            resolver: RecipientResolver::new(storage.clone()),
            storage,
            provider,
            gate: VerificationGate::disabled(),
            settings,
        }
    }

    pub fn with_verification(mut self, gate: VerificationGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Validates and stores a new email. The audience snapshot is taken now.
    pub async fn create_email(&self, new: NewEmail) -> Result<EmailRecord, DispatchError> {
        new.validate()?;

        let now = Utc::now();
        self.gate.check(self.storage.as_ref(), now).await?;

        let record = EmailRecord {
            id: Uuid::new_v4(),
            post_id: new.post_id,
            newsletter_id: new.newsletter_id,
            subject: new.subject,
            from: new.from,
            reply_to: new.reply_to,
            html: new.html,
            visibility: new.visibility,
            recipient_filter: new.recipient_filter.trim().to_string(),
            snapshot_at: now,
            status: EmailStatus::Pending,
            email_count: 0,
            error: None,
            created_at: now,
            submitted_at: None,
        };
        self.storage.insert_email(&record).await?;

        info!(
            email_id = %record.id,
            post_id = %record.post_id,
            filter = %record.recipient_filter,
            "Email created"
        );
        Ok(record)
    }

    pub async fn get_email(&self, email_id: Uuid) -> Result<EmailRecord, DispatchError> {
        self.storage
            .get_email(email_id)
            .await?
            .ok_or(DispatchError::EmailNotFound(email_id))
    }

    /// Plans, persists and sends every batch of a pending email.
    pub async fn send(&self, email_id: Uuid) -> Result<EmailStatus, DispatchError> {
        let email = self.get_email(email_id).await?;
        self.claim(email_id, EmailStatus::Pending).await?;
        self.plan_and_dispatch(email).await
    }

    /// Re-sends the failed batches of an email. Submitted batches are never
    /// touched. A failed email that never got batches is planned again from its
    /// original snapshot. With nothing left to send this does nothing.
    pub async fn retry(&self, email_id: Uuid) -> Result<EmailStatus, DispatchError> {
        let email = self.get_email(email_id).await?;
        let batches = self.storage.list_batches(email_id).await?;

        if batches.is_empty() && email.status == EmailStatus::Failed {
            self.claim(email_id, EmailStatus::Failed).await?;
            info!(email_id = %email_id, "Planning failed email again");
            return self.plan_and_dispatch(email).await;
        }

        let failed: Vec<EmailBatchRecord> = batches
            .into_iter()
            .filter(|b| b.status == BatchStatus::Failed)
            .collect();

        if failed.is_empty() {
            info!(email_id = %email_id, status = %email.status, "Nothing to retry");
            return Ok(email.status);
        }

        self.claim(email_id, EmailStatus::Failed).await?;
        info!(email_id = %email_id, batches = failed.len(), "Retrying failed batches");
        self.dispatch(email, failed, &[BatchStatus::Failed]).await
    }

    /// Cleans up after a process that stopped mid-send, then resumes emails
    /// that were accepted but never started. Call once at startup, before any
    /// send runs.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryReport, DispatchError> {
        let interrupted = self.storage.reset_interrupted().await?;
        for email_id in &interrupted {
            warn!(email_id = %email_id, "Email was interrupted mid-send and is now failed, retry it to finish");
        }

        let mut resumed = Vec::new();
        for email in self.storage.list_emails(EmailStatus::Pending).await? {
            info!(email_id = %email.id, "Resuming pending email");
            // Outcome is recorded on the email; spawn_send logs errors itself.
            let _ = self.spawn_send(email.id);
            resumed.push(email.id);
        }

        Ok(RecoveryReport { interrupted, resumed })
    }

    pub fn spawn_send(self: &Arc<Self>, email_id: Uuid) -> JoinHandle<Result<EmailStatus, DispatchError>> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let result = service.send(email_id).await;
            if let Err(e) = &result {
                error!(email_id = %email_id, error = %e, "Send failed");
            }
            result
        })
    }

    pub fn spawn_retry(self: &Arc<Self>, email_id: Uuid) -> JoinHandle<Result<EmailStatus, DispatchError>> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let result = service.retry(email_id).await;
            if let Err(e) = &result {
                error!(email_id = %email_id, error = %e, "Retry failed");
            }
            result
        })
    }

    async fn claim(&self, email_id: Uuid, from: EmailStatus) -> Result<(), DispatchError> {
        if self.storage.claim_email(email_id, from).await? {
            return Ok(());
        }
        let current = self.get_email(email_id).await?;
        Err(DispatchError::InvalidState {
            email_id,
            status: current.status,
            expected: from,
        })
    }

    fn document(&self, email: &EmailRecord) -> Document {
        let html = if self.settings.outbound_ref {
            add_outbound_ref(&email.html, &self.settings.site_url)
        } else {
            email.html.clone()
        };
        Document::new(html, email.visibility)
    }

    async fn plan_and_dispatch(&self, email: EmailRecord) -> Result<EmailStatus, DispatchError> {
        let email_id = email.id;
        let batches = match self.prepare_batches(&email).await {
            Ok(batches) => batches,
            Err(e) => {
                error!(email_id = %email_id, error = %e, "Failed to plan batches");
                self.storage
                    .set_email_status(email_id, EmailStatus::Failed, Some(e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        self.dispatch(email, batches, &[BatchStatus::Pending]).await
    }

    async fn prepare_batches(&self, email: &EmailRecord) -> Result<Vec<EmailBatchRecord>, DispatchError> {
        let filter = Filter::parse(&email.recipient_filter).map_err(PreconditionError::from)?;
        let recipients = self.resolver.resolve(&filter, email.snapshot_at).await?;

        let document = self.document(email);
        let segments = SegmentSet::for_planning(&extract_segments(&document.html));
        let planned = plan(&recipients, &segments, self.provider.batch_size())?;

        let now = Utc::now();
        let new_batches: Vec<NewBatch> = planned
            .into_iter()
            .map(|p| {
                let batch_id = Uuid::new_v4();
                NewBatch {
                    recipients: p
                        .recipients
                        .iter()
                        .map(|r| EmailRecipientRecord {
                            id: Uuid::new_v4(),
                            email_id: email.id,
                            batch_id,
                            member_id: r.member_id,
                            member_uuid: r.fields.uuid,
                            member_email: r.fields.email.clone(),
                            member_name: r.fields.name.clone(),
                        })
                        .collect(),
                    batch: EmailBatchRecord {
                        id: batch_id,
                        email_id: email.id,
                        segment: p.segment,
                        scoped_segments: p.scoped,
                        chunk_index: p.chunk_index as u32,
                        provider_id: None,
                        status: BatchStatus::Pending,
                        error_status_code: None,
                        error_message: None,
                        error_data: None,
                        created_at: now,
                        updated_at: now,
                    },
                }
            })
            .collect();

        self.storage.create_batches(email.id, &new_batches).await?;

        info!(
            email_id = %email.id,
            recipients = recipients.len(),
            batches = new_batches.len(),
            segments = ?segments.segments(),
            scoped = ?segments.scoped(),
            "Batches planned"
        );

        Ok(new_batches.into_iter().map(|b| b.batch).collect())
    }

    async fn dispatch(
        &self,
        email: EmailRecord,
        batches: Vec<EmailBatchRecord>,
        claim_from: &'static [BatchStatus],
    ) -> Result<EmailStatus, DispatchError> {
        let email_id = email.id;
        let document = self.document(&email);

        let mut rendered: HashMap<SegmentKey, Arc<PreparedContent>> = HashMap::new();
        for batch in &batches {
            let key = batch.segment_key();
            if !rendered.contains_key(&key) {
                let content = render_for_key(&document, &key);
                rendered.insert(key, Arc::new(PreparedContent::from(content)));
            }
        }
        let dispatched: HashSet<Uuid> = batches.iter().map(|b| b.id).collect();

        let ctx = Arc::new(SendContext {
            storage: self.storage.clone(),
            provider: self.provider.clone(),
            email,
            site_url: self.settings.site_url.clone(),
            claim_from,
        });

        let spawn = |join_set: &mut JoinSet<_>, batch: EmailBatchRecord| {
            let ctx = ctx.clone();
            let key = batch.segment_key();
            let prepared = rendered
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Arc::new(PreparedContent::from(render_for_key(&document, &key))));
            join_set.spawn(async move {
                let batch_id = batch.id;
                let outcome = AssertUnwindSafe(send_batch(ctx, batch, prepared))
                    .catch_unwind()
                    .await;
                (batch_id, outcome)
            });
        };

        let mut remaining = batches.into_iter();
        let mut join_set = JoinSet::new();
        for batch in remaining.by_ref().take(self.settings.concurrency.max(1)) {
            spawn(&mut join_set, batch);
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(Ok(_)))) => {}
                Ok((batch_id, Ok(Err(e)))) => {
                    self.record_internal_failure(batch_id, &e.to_string()).await;
                }
                Ok((batch_id, Err(_))) => {
                    self.record_internal_failure(batch_id, "batch task panicked").await;
                }
                // The batch id is lost with the task; the sweep below fails it.
                Err(e) => error!(email_id = %email_id, error = %e, "Batch task did not complete"),
            }

            if let Some(batch) = remaining.next() {
                spawn(&mut join_set, batch);
            }
        }

        let mut batches = self.storage.list_batches(email_id).await?;
        let stuck: Vec<Uuid> = batches
            .iter()
            .filter(|b| {
                matches!(b.status, BatchStatus::Pending | BatchStatus::Sending) && dispatched.contains(&b.id)
            })
            .map(|b| b.id)
            .collect();
        if !stuck.is_empty() {
            for batch_id in &stuck {
                self.record_internal_failure(*batch_id, "batch send did not complete").await;
            }
            batches = self.storage.list_batches(email_id).await?;
        }

        let status = aggregate_status(batches.iter().map(|b| b.status));
        self.storage.set_email_status(email_id, status, None).await?;

        let failed = batches.iter().filter(|b| b.status == BatchStatus::Failed).count();
        if failed > 0 {
            warn!(email_id = %email_id, failed, total = batches.len(), "Email has failed batches");
        } else {
            info!(email_id = %email_id, total = batches.len(), status = %status, "Email dispatched");
        }

        Ok(status)
    }

    async fn record_internal_failure(&self, batch_id: Uuid, message: &str) {
        error!(batch_id = %batch_id, error = %message, "Batch send aborted");
        let failure = BatchFailure {
            status_code: None,
            message: message.to_string(),
            data: serde_json::json!({ "error": { "message": message } }),
        };
        if let Err(e) = self.storage.mark_batch_failed(batch_id, &failure).await {
            error!(batch_id = %batch_id, error = %e, "Failed to record batch failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_status() {
        use BatchStatus::*;
        assert_eq!(aggregate_status([Submitted, Submitted]), EmailStatus::Submitted);
        assert_eq!(aggregate_status([Submitted, Failed, Submitted]), EmailStatus::Failed);
        assert_eq!(aggregate_status([Submitted, Sending]), EmailStatus::Submitting);
        assert_eq!(aggregate_status([Pending, Failed]), EmailStatus::Failed);
        assert_eq!(aggregate_status(Vec::<BatchStatus>::new()), EmailStatus::Submitted);
    }

    #[test]
    fn test_new_email_validation() {
        let valid = NewEmail {
            post_id: "p".to_string(),
            newsletter_id: None,
            subject: "Subject".to_string(),
            from: "blog@example.com".to_string(),
            reply_to: None,
            html: "<p>Body</p>".to_string(),
            visibility: None,
            recipient_filter: String::new(),
        };
        assert!(valid.validate().is_ok());

        let mut missing = valid.clone();
        missing.subject = "  ".to_string();
        assert_eq!(missing.validate(), Err(PreconditionError::MissingSubject));

        let mut missing = valid.clone();
        missing.html.clear();
        assert_eq!(missing.validate(), Err(PreconditionError::MissingBody));

        let mut missing = valid.clone();
        missing.from.clear();
        assert_eq!(missing.validate(), Err(PreconditionError::MissingFrom));

        let mut bad_filter = valid;
        bad_filter.recipient_filter = "label:[a,b".to_string();
        assert!(matches!(bad_filter.validate(), Err(PreconditionError::InvalidFilter(_))));
    }
}
