use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::dispatch::{DispatchError, EmailService, NewEmail, PreconditionError};
use crate::member::{Member, MemberStatus};
use crate::storage::{EmailBatchRecord, EmailRecipientRecord, EmailRecord, EmailStatus, StorageError};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EmailService>,
}

#[derive(Debug, Deserialize)]
pub struct MemberInput {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: MemberStatus,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tiers: Vec<String>,
    #[serde(default = "default_true")]
    pub subscribed: bool,
    /// Defaults to the time of the request.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ImportMembersRequest {
    pub members: Vec<MemberInput>,
}

#[derive(Debug, Serialize)]
pub struct ImportMembersResponse {
    pub imported: usize,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BatchesResponse {
    pub email_id: Uuid,
    pub batches: Vec<EmailBatchRecord>,
}

#[derive(Debug, Serialize)]
pub struct RecipientsResponse {
    pub email_id: Uuid,
    pub batch_id: Uuid,
    pub recipients: Vec<EmailRecipientRecord>,
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /api/members
pub async fn import_members(
    State(state): State<AppState>,
    Json(request): Json<ImportMembersRequest>,
) -> Result<(StatusCode, Json<ImportMembersResponse>), ApiError> {
    let now = Utc::now();
    let mut members = Vec::with_capacity(request.members.len());

    for (i, input) in request.members.into_iter().enumerate() {
        if !input.email.contains('@') {
            return Err(ApiError::BadRequest(format!(
                "members[{}]: '{}' is not an email address",
                i, input.email
            )));
        }
        let mut member = Member::new(input.email, input.status, input.created_at.unwrap_or(now));
        member.name = input.name;
        member.labels = input.labels;
        member.tiers = input.tiers;
        member.subscribed = input.subscribed;
        members.push(member);
    }

    state.service.storage().insert_members(&members).await?;
    tracing::info!(count = members.len(), "Imported members");

    Ok((
        StatusCode::CREATED,
        Json(ImportMembersResponse {
            imported: members.len(),
            ids: members.iter().map(|m| m.id).collect(),
        }),
    ))
}

/// POST /api/emails
///
/// Stores the email and starts sending it in the background.
pub async fn create_email(
    State(state): State<AppState>,
    Json(request): Json<NewEmail>,
) -> Result<(StatusCode, Json<EmailRecord>), ApiError> {
    let email = state.service.create_email(request).await?;
    // Outcome is recorded on the email; spawn_send logs errors itself.
    let _ = state.service.spawn_send(email.id);
    Ok((StatusCode::ACCEPTED, Json(email)))
}

/// GET /api/emails/:id
pub async fn get_email(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmailRecord>, ApiError> {
    Ok(Json(state.service.get_email(id).await?))
}

/// GET /api/emails/:id/batches
pub async fn list_batches(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchesResponse>, ApiError> {
    state.service.get_email(id).await?;
    let batches = state.service.storage().list_batches(id).await?;
    Ok(Json(BatchesResponse {
        email_id: id,
        batches,
    }))
}

/// GET /api/emails/:id/batches/:batch_id/recipients
pub async fn list_batch_recipients(
    State(state): State<AppState>,
    Path((id, batch_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RecipientsResponse>, ApiError> {
    let storage = state.service.storage();
    match storage.get_batch(batch_id).await? {
        Some(batch) if batch.email_id == id => {}
        _ => {
            return Err(ApiError::NotFound(format!(
                "batch {} not found for email {}",
                batch_id, id
            )))
        }
    }

    let recipients = storage.list_recipients(id, Some(batch_id)).await?;
    Ok(Json(RecipientsResponse {
        email_id: id,
        batch_id,
        recipients,
    }))
}

/// PUT /api/emails/:id/retry
pub async fn retry_email(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<EmailRecord>), ApiError> {
    let email = state.service.get_email(id).await?;
    if matches!(email.status, EmailStatus::Pending | EmailStatus::Submitting) {
        return Err(ApiError::Conflict(format!(
            "email {} is {}, only sent emails can be retried",
            id, email.status
        )));
    }

    let _ = state.service.spawn_retry(id);
    Ok((StatusCode::ACCEPTED, Json(email)))
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    InternalError(String),
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Precondition(p @ PreconditionError::VerificationRequired { .. }) => {
                ApiError::Forbidden(p.to_string())
            }
            DispatchError::Precondition(p) => ApiError::Unprocessable(p.to_string()),
            DispatchError::EmailNotFound(_) => ApiError::NotFound(e.to_string()),
            DispatchError::InvalidState { .. } => ApiError::Conflict(e.to_string()),
            DispatchError::Partition(_) | DispatchError::Storage(_) => {
                ApiError::InternalError(e.to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            StorageError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::InternalError(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
