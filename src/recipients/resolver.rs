use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::Recipient;
use crate::member::Member;
use crate::segment::Filter;
use crate::storage::{Storage, StorageError};

/// Resolves an email's audience from the member store.
pub struct RecipientResolver {
    storage: Arc<dyn Storage>,
}

impl RecipientResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Members matching `filter`, created at or before `snapshot` and still
    /// subscribed, ordered by member id.
    pub async fn resolve(
        &self,
        filter: &Filter,
        snapshot: DateTime<Utc>,
    ) -> Result<Vec<Recipient>, StorageError> {
        let members = self.storage.list_members_created_before(snapshot).await?;
        let recipients = resolve_from(&members, filter, snapshot);
        debug!(
            candidates = members.len(),
            recipients = recipients.len(),
            filter = %filter,
            "Resolved recipients"
        );
        Ok(recipients)
    }
}

pub fn resolve_from(members: &[Member], filter: &Filter, snapshot: DateTime<Utc>) -> Vec<Recipient> {
    let mut by_id: BTreeMap<Uuid, Recipient> = BTreeMap::new();
    for member in members {
        if member.created_at > snapshot || !member.subscribed || !filter.matches(member) {
            continue;
        }
        by_id.entry(member.id).or_insert_with(|| Recipient::from(member));
    }

    // Provider recipient variables are keyed by address, so one address may
    // only appear once per email.
    let mut addresses = HashSet::new();
    by_id
        .into_values()
        .filter(|r| {
            let fresh = addresses.insert(r.fields.email.to_lowercase());
            if !fresh {
                warn!(member_id = %r.member_id, email = %r.fields.email, "Skipping member sharing an address");
            }
            fresh
        })
        .collect()
}
