use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub site: SiteConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mailgun,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_base_url() -> String {
    "https://api.mailgun.net/v3".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Batches of one email sent at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    2
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    #[serde(default)]
    pub outbound_ref: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Sites that completed verification skip the import check.
    #[serde(default)]
    pub verified: bool,
    #[serde(default = "default_import_threshold")]
    pub import_threshold: u64,
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,
}

fn default_import_threshold() -> u64 {
    1000
}

fn default_window() -> Duration {
    Duration::from_secs(30 * 24 * 3600)
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verified: false,
            import_threshold: default_import_threshold(),
            window: default_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
}
