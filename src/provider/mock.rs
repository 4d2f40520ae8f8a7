//! Scripted provider for tests and local runs

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{BatchPayload, EmailProvider, ProviderError, ProviderReceipt};

/// Provider that records every payload and fails on request.
///
/// Call numbers passed to [`MockProvider::fail_on_call`] are 1-based and count
/// every `send` since construction.
#[derive(Debug, Clone)]
pub struct MockProvider {
    send_count: Arc<AtomicUsize>,
    failing_calls: Arc<Mutex<HashSet<usize>>>,
    fail_all: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<BatchPayload>>>,
    batch_size: usize,
    delay: Option<Duration>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            send_count: Arc::new(AtomicUsize::new(0)),
            failing_calls: Arc::new(Mutex::new(HashSet::new())),
            fail_all: Arc::new(AtomicBool::new(false)),
            sent: Arc::new(Mutex::new(Vec::new())),
            batch_size: 1000,
            delay: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Holds every call for `delay` before it is counted.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_on_call(self, call: usize) -> Self {
        locked(&self.failing_calls).insert(call);
        self
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn send_call_count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    /// Payloads of successful calls, in completion order.
    pub fn sent(&self) -> Vec<BatchPayload> {
        locked(&self.sent).clone()
    }
}

#[async_trait]
impl EmailProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn send(&self, payload: &BatchPayload) -> Result<ProviderReceipt, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let call = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail_all.load(Ordering::SeqCst) || locked(&self.failing_calls).contains(&call) {
            return Err(ProviderError::new(
                Some(500),
                "Internal server error",
                Some("Something went wrong".to_string()),
            ));
        }

        locked(&self.sent).push(payload.clone());
        Ok(ProviderReceipt {
            id: format!("mock-id-{}", call),
        })
    }
}
