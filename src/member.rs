use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Subscription status of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Free,
    Paid,
    Comped,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Free => "free",
            MemberStatus::Paid => "paid",
            MemberStatus::Comped => "comped",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(MemberStatus::Free),
            "paid" => Ok(MemberStatus::Paid),
            "comped" => Ok(MemberStatus::Comped),
            other => Err(format!("unknown member status '{}'", other)),
        }
    }
}

fn default_subscribed() -> bool {
    true
}

/// A subscriber as stored and seen by the recipient resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub uuid: Uuid,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: MemberStatus,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tiers: Vec<String>,
    #[serde(default = "default_subscribed")]
    pub subscribed: bool,
    pub created_at: DateTime<Utc>,
}

impl Member {
    /// Convenience constructor used by importers and tests.
    pub fn new(email: impl Into<String>, status: MemberStatus, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uuid: Uuid::new_v4(),
            email: email.into(),
            name: None,
            status,
            labels: Vec::new(),
            tiers: Vec::new(),
            subscribed: true,
            created_at,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tiers.push(tier.into());
        self
    }

    pub fn unsubscribed(mut self) -> Self {
        self.subscribed = false;
        self
    }
}

/// Member attributes a filter expression can inspect.
pub trait Attributes {
    fn status(&self) -> MemberStatus;
    fn labels(&self) -> &[String];
    fn tiers(&self) -> &[String];
    fn email(&self) -> &str;
    fn uuid(&self) -> Uuid;
    fn subscribed(&self) -> bool;
}

impl Attributes for Member {
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
        &self.email
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn subscribed(&self) -> bool {
        self.subscribed
    }
}
