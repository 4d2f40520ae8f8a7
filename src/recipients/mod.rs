mod resolver;

pub use resolver::{resolve_from, RecipientResolver};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::member::{Attributes, Member, MemberStatus};

/// Member values snapshotted when an email's audience is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFields {
    pub uuid: Uuid,
    pub email: String,
    pub name: Option<String>,
}

impl MergeFields {
    pub fn first_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
    }
}

/// An addressable member of one email's audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub member_id: Uuid,
    pub fields: MergeFields,
    pub status: MemberStatus,
    pub labels: Vec<String>,
    pub tiers: Vec<String>,
}

impl From<&Member> for Recipient {
    fn from(member: &Member) -> Self {
        Self {
            member_id: member.id,
            fields: MergeFields {
                uuid: member.uuid,
                email: member.email.clone(),
                name: member.name.clone(),
            },
            status: member.status,
            labels: member.labels.clone(),
            tiers: member.tiers.clone(),
        }
    }
}

impl Attributes for Recipient {
    fn status(&self) -> MemberStatus {
        self.status
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn tiers(&self) -> &[String] {
        &self.tiers
    }

    fn email(&self) -> &str {
        &self.fields.email
    }

    fn uuid(&self) -> Uuid {
        self.fields.uuid
    }

    // Only subscribed members become recipients.
    fn subscribed(&self) -> bool {
        true
    }
}
