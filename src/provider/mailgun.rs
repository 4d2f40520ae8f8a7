//! Mailgun messages API client

use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::Deserialize;
use tracing::{debug, warn};

use super::traits::{BatchPayload, EmailProvider, ProviderError, ProviderReceipt};
use crate::config::types::ProviderConfig;

/// Mailgun rejects larger recipient lists.
pub const MAILGUN_MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
pub struct MailgunProvider {
    base_url: String,
    domain: String,
    api_key: String,
    batch_size: usize,
    client: reqwest::Client,
}

impl MailgunProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let missing = |field: &str| {
            ProviderError::new(None, format!("provider.{} is required for mailgun", field), None)
        };
        let domain = config.domain.clone().ok_or_else(|| missing("domain"))?;
        let api_key = config.api_key.clone().ok_or_else(|| missing("api_key"))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::new(None, "Failed to build HTTP client", Some(e.to_string())))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            domain,
            api_key,
            batch_size: config.batch_size.min(MAILGUN_MAX_BATCH_SIZE),
            client,
        })
    }

    fn form(payload: &BatchPayload) -> Result<Form, ProviderError> {
        let variables = serde_json::to_string(&payload.recipient_variables).map_err(|e| {
            ProviderError::new(None, "Failed to encode recipient variables", Some(e.to_string()))
        })?;

        let mut form = Form::new()
            .text("from", payload.from.clone())
            .text("subject", payload.subject.clone())
            .text("html", payload.html.clone())
            .text("text", payload.plaintext.clone())
            .text("recipient-variables", variables);

        for to in &payload.recipients {
            form = form.text("to", to.clone());
        }
        if let Some(reply_to) = &payload.reply_to {
            form = form.text("h:Reply-To", reply_to.clone());
        }
        for (name, value) in &payload.headers {
            form = form.text(format!("h:{}", name), value.clone());
        }
        for tag in &payload.tags {
            form = form.text("o:tag", tag.clone());
        }

        Ok(form)
    }
}

#[async_trait]
impl EmailProvider for MailgunProvider {
    fn name(&self) -> &str {
        "mailgun"
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn send(&self, payload: &BatchPayload) -> Result<ProviderReceipt, ProviderError> {
        let url = format!("{}/{}/messages", self.base_url, self.domain);
        let form = Self::form(payload)?;

        let response = self
            .client
            .post(&url)
            .basic_auth("api", Some(&self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                ProviderError::new(
                    e.status().map(|s| s.as_u16()),
                    "Mailgun request failed",
                    Some(e.to_string()),
                )
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            warn!(
                batch_id = %payload.batch_id,
                status = status.as_u16(),
                detail = %detail,
                "Mailgun rejected batch"
            );
            return Err(ProviderError::new(
                Some(status.as_u16()),
                status.canonical_reason().unwrap_or("Mailgun error"),
                Some(detail),
            ));
        }

        let parsed: SendResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::new(
                Some(status.as_u16()),
                "Unexpected Mailgun response",
                Some(e.to_string()),
            )
        })?;

        let id = parsed.id.trim().trim_start_matches('<').trim_end_matches('>').to_string();
        debug!(batch_id = %payload.batch_id, provider_id = %id, "Mailgun accepted batch");
        Ok(ProviderReceipt { id })
    }
}
