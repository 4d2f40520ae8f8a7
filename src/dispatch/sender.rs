use std::sync::Arc;
use tracing::{debug, info, warn};

use super::payload::{build_payload, error_data, PreparedContent};
use crate::provider::EmailProvider;
use crate::storage::{BatchFailure, BatchStatus, EmailBatchRecord, EmailRecord, Storage, StorageError};

/// Shared, read-only inputs of one dispatch run.
pub(crate) struct SendContext {
    pub storage: Arc<dyn Storage>,
    pub provider: Arc<dyn EmailProvider>,
    pub email: EmailRecord,
    pub site_url: String,
    /// States a batch may be claimed from in this run.
    pub claim_from: &'static [BatchStatus],
}

/// Claims, sends and records one batch.
///
/// Returns `None` when another writer already owns the batch.
pub(crate) async fn send_batch(
    ctx: Arc<SendContext>,
    batch: EmailBatchRecord,
    prepared: Arc<PreparedContent>,
) -> Result<Option<BatchStatus>, StorageError> {
    if !ctx.storage.claim_batch(batch.id, ctx.claim_from).await? {
        debug!(batch_id = %batch.id, "Batch claimed elsewhere, skipping");
        return Ok(None);
    }

    let recipients = ctx
        .storage
        .list_recipients(ctx.email.id, Some(batch.id))
        .await?;
    let payload = build_payload(
        &ctx.email,
        &batch,
        &prepared,
        &recipients,
        ctx.provider.as_ref(),
        &ctx.site_url,
    );

    match ctx.provider.send(&payload).await {
        Ok(receipt) => {
            ctx.storage.mark_batch_submitted(batch.id, &receipt.id).await?;
            info!(
                email_id = %ctx.email.id,
                batch_id = %batch.id,
                segment = batch.segment.as_deref().unwrap_or("all"),
                recipients = recipients.len(),
                provider_id = %receipt.id,
                "Batch submitted"
            );
            Ok(Some(BatchStatus::Submitted))
        }
        Err(e) => {
            let failure = BatchFailure {
                status_code: e.status_code,
                message: e.full_message(),
                data: error_data(&e, &payload),
            };
            ctx.storage.mark_batch_failed(batch.id, &failure).await?;
            warn!(
                email_id = %ctx.email.id,
                batch_id = %batch.id,
                provider = ctx.provider.name(),
                status = ?e.status_code,
                error = %failure.message,
                "Batch failed"
            );
            Ok(Some(BatchStatus::Failed))
        }
    }
}
