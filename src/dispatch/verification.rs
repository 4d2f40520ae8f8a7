use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

use super::{DispatchError, PreconditionError};
use crate::config::types::VerificationConfig;
use crate::storage::Storage;

/// Blocks email creation on unverified sites that recently imported a large
/// number of members.
#[derive(Debug, Clone)]
pub struct VerificationGate {
    enabled: bool,
    verified: bool,
    import_threshold: u64,
    window: Duration,
}

impl VerificationGate {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            verified: false,
            import_threshold: u64::MAX,
            window: Duration::ZERO,
        }
    }

    pub fn new(import_threshold: u64, window: Duration) -> Self {
        Self {
            enabled: true,
            verified: false,
            import_threshold,
            window,
        }
    }

    pub fn from_config(config: &VerificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            verified: config.verified,
            import_threshold: config.import_threshold,
            window: config.window,
        }
    }

    pub async fn check(&self, storage: &dyn Storage, now: DateTime<Utc>) -> Result<(), DispatchError> {
        if !self.enabled || self.verified {
            return Ok(());
        }

        let since = chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent = storage.count_members_created_since(since).await?;

        if recent > self.import_threshold {
            warn!(
                recent,
                threshold = self.import_threshold,
                "Email creation blocked until the site's audience is verified"
            );
            return Err(PreconditionError::VerificationRequired {
                recent,
                threshold: self.import_threshold,
            }
            .into());
        }

        Ok(())
    }
}
