use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use super::traits::{BatchPayload, EmailProvider, ProviderError, ProviderReceipt};

/// Dry-run provider: logs each batch instead of delivering it.
#[derive(Debug)]
pub struct LogProvider {
    batch_size: usize,
    counter: AtomicU64,
}

impl LogProvider {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl EmailProvider for LogProvider {
    fn name(&self) -> &str {
        "log"
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn send(&self, payload: &BatchPayload) -> Result<ProviderReceipt, ProviderError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            email_id = %payload.email_id,
            batch_id = %payload.batch_id,
            recipients = payload.recipients.len(),
            subject = %payload.subject,
            html_bytes = payload.html.len(),
            "Dry run: batch not delivered"
        );
        Ok(ProviderReceipt {
            id: format!("log-{}-{}", payload.batch_id, n),
        })
    }
}
