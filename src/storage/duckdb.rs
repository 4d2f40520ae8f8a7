use super::traits::{
    BatchFailure, BatchStatus, EmailBatchRecord, EmailRecipientRecord, EmailRecord, EmailStatus,
    NewBatch, Storage, StorageError,
};
use crate::member::{Member, MemberStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Connection, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

fn conversion_error<E>(idx: usize, ty: duckdb::types::Type, e: E) -> duckdb::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    duckdb::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

fn uuid_at(row: &Row<'_>, idx: usize) -> duckdb::Result<Uuid> {
    Uuid::parse_str(&row.get::<_, String>(idx)?)
        .map_err(|e| conversion_error(idx, duckdb::types::Type::Text, e))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> duckdb::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, duckdb::types::Type::Text, e)))
        .transpose()
}

fn ts_at(row: &Row<'_>, idx: usize) -> duckdb::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(row.get::<_, i64>(idx)?).ok_or_else(|| {
        conversion_error(idx, duckdb::types::Type::BigInt, invalid("invalid timestamp"))
    })
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> duckdb::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(micros) => DateTime::from_timestamp_micros(micros)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, duckdb::types::Type::BigInt, invalid("invalid timestamp"))),
        None => Ok(None),
    }
}

fn parsed_at<T: std::str::FromStr>(row: &Row<'_>, idx: usize) -> duckdb::Result<T> {
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|_| conversion_error(idx, duckdb::types::Type::Text, invalid("unrecognised enum value")))
}

fn json_list_at(row: &Row<'_>, idx: usize) -> duckdb::Result<Vec<String>> {
    serde_json::from_str(&row.get::<_, String>(idx)?)
        .map_err(|e| conversion_error(idx, duckdb::types::Type::Text, e))
}

const MEMBER_COLUMNS: &str =
    "id, uuid, email, name, status, labels, tiers, subscribed, created_at_us";

fn member_from_row(row: &Row<'_>) -> duckdb::Result<Member> {
    Ok(Member {
        id: uuid_at(row, 0)?,
        uuid: uuid_at(row, 1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        status: parsed_at::<MemberStatus>(row, 4)?,
        labels: json_list_at(row, 5)?,
        tiers: json_list_at(row, 6)?,
        subscribed: row.get(7)?,
        created_at: ts_at(row, 8)?,
    })
}

const EMAIL_COLUMNS: &str = "id, post_id, newsletter_id, subject, from_address, reply_to, html, \
     visibility, recipient_filter, snapshot_at_us, status, email_count, error, created_at_us, submitted_at_us";

fn email_from_row(row: &Row<'_>) -> duckdb::Result<EmailRecord> {
    let visibility = match row.get::<_, Option<String>>(7)? {
        Some(v) => Some(v.parse().map_err(|_| {
            conversion_error(7, duckdb::types::Type::Text, invalid("unrecognised visibility"))
        })?),
        None => None,
    };

    Ok(EmailRecord {
        id: uuid_at(row, 0)?,
        post_id: row.get(1)?,
        newsletter_id: opt_uuid_at(row, 2)?,
        subject: row.get(3)?,
        from: row.get(4)?,
        reply_to: row.get(5)?,
        html: row.get(6)?,
        visibility,
        recipient_filter: row.get(8)?,
        snapshot_at: ts_at(row, 9)?,
        status: parsed_at::<EmailStatus>(row, 10)?,
        email_count: row.get::<_, i64>(11)?.max(0) as u64,
        error: row.get(12)?,
        created_at: ts_at(row, 13)?,
        submitted_at: opt_ts_at(row, 14)?,
    })
}

const BATCH_COLUMNS: &str = "id, email_id, segment, chunk_index, provider_id, status, \
     error_status_code, error_message, error_data, created_at_us, updated_at_us, scoped_segments";

fn batch_from_row(row: &Row<'_>) -> duckdb::Result<EmailBatchRecord> {
    let error_data = match row.get::<_, Option<String>>(8)? {
        Some(raw) => Some(
            serde_json::from_str(&raw).map_err(|e| conversion_error(8, duckdb::types::Type::Text, e))?,
        ),
        None => None,
    };

    Ok(EmailBatchRecord {
        id: uuid_at(row, 0)?,
        email_id: uuid_at(row, 1)?,
        segment: row.get(2)?,
        scoped_segments: json_list_at(row, 11)?,
        chunk_index: row.get::<_, i64>(3)?.max(0) as u32,
        provider_id: row.get(4)?,
        status: parsed_at::<BatchStatus>(row, 5)?,
        error_status_code: row.get::<_, Option<i64>>(6)?.map(|c| c as u16),
        error_message: row.get(7)?,
        error_data,
        created_at: ts_at(row, 9)?,
        updated_at: ts_at(row, 10)?,
    })
}

const INTERRUPTED_MESSAGE: &str = "Send was interrupted before the provider confirmed it";

const RECIPIENT_COLUMNS: &str =
    "id, email_id, batch_id, member_id, member_uuid, member_email, member_name";

fn recipient_from_row(row: &Row<'_>) -> duckdb::Result<EmailRecipientRecord> {
    Ok(EmailRecipientRecord {
        id: uuid_at(row, 0)?,
        email_id: uuid_at(row, 1)?,
        batch_id: uuid_at(row, 2)?,
        member_id: uuid_at(row, 3)?,
        member_uuid: uuid_at(row, 4)?,
        member_email: row.get(5)?,
        member_name: row.get(6)?,
    })
}

/// DuckDB implementation of the Storage trait
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Database(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "Opened DuckDB database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` on the blocking pool with the connection locked.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl Storage for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS members (
                    id VARCHAR PRIMARY KEY,
                    uuid VARCHAR NOT NULL,
                    email VARCHAR NOT NULL UNIQUE,
                    name VARCHAR,
                    status VARCHAR NOT NULL,
                    labels VARCHAR NOT NULL,
                    tiers VARCHAR NOT NULL,
                    subscribed BOOLEAN NOT NULL,
                    created_at_us BIGINT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_members_created ON members(created_at_us);

                CREATE TABLE IF NOT EXISTS emails (
                    id VARCHAR PRIMARY KEY,
                    post_id VARCHAR NOT NULL,
                    newsletter_id VARCHAR,
                    subject VARCHAR NOT NULL,
                    from_address VARCHAR NOT NULL,
                    reply_to VARCHAR,
                    html VARCHAR NOT NULL,
                    visibility VARCHAR,
                    recipient_filter VARCHAR NOT NULL,
                    snapshot_at_us BIGINT NOT NULL,
                    status VARCHAR NOT NULL,
                    email_count BIGINT NOT NULL DEFAULT 0,
                    error VARCHAR,
                    created_at_us BIGINT NOT NULL,
                    submitted_at_us BIGINT
                );

                CREATE TABLE IF NOT EXISTS email_batches (
                    id VARCHAR PRIMARY KEY,
                    email_id VARCHAR NOT NULL,
                    seq INTEGER NOT NULL,
                    segment VARCHAR,
                    scoped_segments VARCHAR NOT NULL DEFAULT '[]',
                    chunk_index INTEGER NOT NULL,
                    provider_id VARCHAR,
                    status VARCHAR NOT NULL,
                    error_status_code INTEGER,
                    error_message VARCHAR,
                    error_data VARCHAR,
                    created_at_us BIGINT NOT NULL,
                    updated_at_us BIGINT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_batches_email ON email_batches(email_id);

                CREATE TABLE IF NOT EXISTS email_recipients (
                    id VARCHAR PRIMARY KEY,
                    email_id VARCHAR NOT NULL,
                    batch_id VARCHAR NOT NULL,
                    member_id VARCHAR NOT NULL,
                    member_uuid VARCHAR NOT NULL,
                    member_email VARCHAR NOT NULL,
                    member_name VARCHAR,
                    UNIQUE (email_id, member_id)
                );
                CREATE INDEX IF NOT EXISTS idx_recipients_batch ON email_recipients(batch_id);",
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_members(&self, members: &[Member]) -> Result<(), StorageError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut seen = HashSet::new();
        for member in members {
            if !seen.insert(member.email.to_lowercase()) {
                return Err(StorageError::Conflict(format!(
                    "member address {} appears more than once",
                    member.email
                )));
            }
        }
        let members = members.to_vec();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut taken = tx.prepare("SELECT COUNT(*) FROM members WHERE lower(email) = lower(?)")?;
                for member in &members {
                    let count: i64 = taken.query_row(duckdb::params![member.email], |row| row.get(0))?;
                    if count > 0 {
                        return Err(StorageError::Conflict(format!(
                            "member address {} already exists",
                            member.email
                        )));
                    }
                }

                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO members ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    MEMBER_COLUMNS
                ))?;
                for member in &members {
                    stmt.execute(duckdb::params![
                        member.id.to_string(),
                        member.uuid.to_string(),
                        member.email,
                        member.name,
                        member.status.as_str(),
                        serde_json::to_string(&member.labels)?,
                        serde_json::to_string(&member.tiers)?,
                        member.subscribed,
                        member.created_at.timestamp_micros(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_members_created_before(
        &self,
        snapshot: DateTime<Utc>,
    ) -> Result<Vec<Member>, StorageError> {
        let snapshot_micros = snapshot.timestamp_micros();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM members WHERE created_at_us <= ? ORDER BY id",
                MEMBER_COLUMNS
            ))?;
            let rows = stmt.query_map(duckdb::params![snapshot_micros], member_from_row)?;

            let mut members = Vec::new();
            for row in rows {
                members.push(row?);
            }
            Ok(members)
        })
        .await
    }

    async fn count_members_created_since(&self, since: DateTime<Utc>) -> Result<u64, StorageError> {
        let since_micros = since.timestamp_micros();

        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM members WHERE created_at_us >= ?",
                duckdb::params![since_micros],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn insert_email(&self, email: &EmailRecord) -> Result<(), StorageError> {
        let email = email.clone();

        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO emails ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    EMAIL_COLUMNS
                ),
                duckdb::params![
                    email.id.to_string(),
                    email.post_id,
                    email.newsletter_id.map(|id| id.to_string()),
                    email.subject,
                    email.from,
                    email.reply_to,
                    email.html,
                    email.visibility.map(|v| v.as_str()),
                    email.recipient_filter,
                    email.snapshot_at.timestamp_micros(),
                    email.status.as_str(),
                    email.email_count as i64,
                    email.error,
                    email.created_at.timestamp_micros(),
                    email.submitted_at.map(|t| t.timestamp_micros()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_email(&self, id: Uuid) -> Result<Option<EmailRecord>, StorageError> {
        let id = id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM emails WHERE id = ?", EMAIL_COLUMNS))?;
            let mut rows = stmt.query(duckdb::params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(email_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_emails(&self, status: EmailStatus) -> Result<Vec<EmailRecord>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM emails WHERE status = ? ORDER BY created_at_us, id",
                EMAIL_COLUMNS
            ))?;
            let rows = stmt.query_map(duckdb::params![status.as_str()], email_from_row)?;

            let mut emails = Vec::new();
            for row in rows {
                emails.push(row?);
            }
            Ok(emails)
        })
        .await
    }

    async fn claim_email(&self, id: Uuid, from: EmailStatus) -> Result<bool, StorageError> {
        let id = id.to_string();

        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE emails SET status = ?, error = NULL WHERE id = ? AND status = ?",
                duckdb::params![EmailStatus::Submitting.as_str(), id, from.as_str()],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn set_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        error: Option<String>,
    ) -> Result<(), StorageError> {
        let id_str = id.to_string();
        let submitted_at = (status == EmailStatus::Submitted).then(|| Utc::now().timestamp_micros());

        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE emails
                 SET status = ?, error = ?, submitted_at_us = COALESCE(?, submitted_at_us)
                 WHERE id = ?",
                duckdb::params![status.as_str(), error, submitted_at, id_str],
            )?;
            if changed == 0 {
                return Err(StorageError::NotFound(format!("email {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn reset_interrupted(&self) -> Result<Vec<Uuid>, StorageError> {
        let message = INTERRUPTED_MESSAGE.to_string();
        let data = serde_json::to_string(&serde_json::json!({ "error": { "message": INTERRUPTED_MESSAGE } }))?;
        let now = Utc::now().timestamp_micros();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut affected: Vec<String> = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT DISTINCT email_id FROM email_batches WHERE status = ?
                     UNION
                     SELECT id FROM emails WHERE status = ?",
                )?;
                let rows = stmt.query_map(
                    duckdb::params![BatchStatus::Sending.as_str(), EmailStatus::Submitting.as_str()],
                    |row| row.get::<_, String>(0),
                )?;
                for row in rows {
                    affected.push(row?);
                }
            }

            tx.execute(
                "UPDATE email_batches
                 SET status = ?, error_status_code = NULL, error_message = ?, error_data = ?, updated_at_us = ?
                 WHERE status = ?
                    OR (status = ? AND email_id IN (SELECT id FROM emails WHERE status = ?))",
                duckdb::params![
                    BatchStatus::Failed.as_str(),
                    message,
                    data,
                    now,
                    BatchStatus::Sending.as_str(),
                    BatchStatus::Pending.as_str(),
                    EmailStatus::Submitting.as_str()
                ],
            )?;
            tx.execute(
                "UPDATE emails SET status = ?, error = ? WHERE status = ?",
                duckdb::params![
                    EmailStatus::Failed.as_str(),
                    message,
                    EmailStatus::Submitting.as_str()
                ],
            )?;
            tx.commit()?;

            affected.sort();
            affected
                .iter()
                .map(|id| {
                    Uuid::parse_str(id)
                        .map_err(|e| StorageError::InvalidData(format!("email id '{}': {}", id, e)))
                })
                .collect()
        })
        .await
    }

    async fn create_batches(&self, email_id: Uuid, batches: &[NewBatch]) -> Result<(), StorageError> {
        let email_id = email_id.to_string();
        let batches = batches.to_vec();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut batch_stmt = tx.prepare(
                    "INSERT INTO email_batches (id, email_id, seq, segment, scoped_segments, chunk_index,
                        provider_id, status, error_status_code, error_message, error_data, created_at_us,
                        updated_at_us)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )?;
                let mut recipient_stmt = tx.prepare(&format!(
                    "INSERT INTO email_recipients ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                    RECIPIENT_COLUMNS
                ))?;

                for (seq, NewBatch { batch, recipients }) in batches.iter().enumerate() {
                    let error_data = batch
                        .error_data
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?;
                    batch_stmt.execute(duckdb::params![
                        batch.id.to_string(),
                        batch.email_id.to_string(),
                        seq as i64,
                        batch.segment,
                        serde_json::to_string(&batch.scoped_segments)?,
                        batch.chunk_index as i64,
                        batch.provider_id,
                        batch.status.as_str(),
                        batch.error_status_code.map(i64::from),
                        batch.error_message,
                        error_data,
                        batch.created_at.timestamp_micros(),
                        batch.updated_at.timestamp_micros(),
                    ])?;

                    for r in recipients {
                        recipient_stmt.execute(duckdb::params![
                            r.id.to_string(),
                            r.email_id.to_string(),
                            r.batch_id.to_string(),
                            r.member_id.to_string(),
                            r.member_uuid.to_string(),
                            r.member_email,
                            r.member_name,
                        ])?;
                    }
                }
            }
            let changed = tx.execute(
                "UPDATE emails
                 SET email_count = (SELECT COUNT(*) FROM email_recipients WHERE email_id = ?)
                 WHERE id = ?",
                duckdb::params![email_id, email_id],
            )?;
            if changed == 0 {
                return Err(StorageError::NotFound(format!("email {}", email_id)));
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_batches(&self, email_id: Uuid) -> Result<Vec<EmailBatchRecord>, StorageError> {
        let email_id = email_id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM email_batches WHERE email_id = ? ORDER BY seq",
                BATCH_COLUMNS
            ))?;
            let rows = stmt.query_map(duckdb::params![email_id], batch_from_row)?;

            let mut batches = Vec::new();
            for row in rows {
                batches.push(row?);
            }
            Ok(batches)
        })
        .await
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<EmailBatchRecord>, StorageError> {
        let batch_id = batch_id.to_string();

        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM email_batches WHERE id = ?", BATCH_COLUMNS))?;
            let mut rows = stmt.query(duckdb::params![batch_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(batch_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_recipients(
        &self,
        email_id: Uuid,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<EmailRecipientRecord>, StorageError> {
        let email_id = email_id.to_string();
        let batch_id = batch_id.map(|id| id.to_string());

        self.with_conn(move |conn| {
            let (filter, params) = match batch_id {
                Some(batch_id) => ("email_id = ? AND batch_id = ?", vec![email_id, batch_id]),
                None => ("email_id = ?", vec![email_id]),
            };
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM email_recipients WHERE {} ORDER BY member_id",
                RECIPIENT_COLUMNS, filter
            ))?;
            let rows = stmt.query_map(duckdb::params_from_iter(params), recipient_from_row)?;

            let mut recipients = Vec::new();
            for row in rows {
                recipients.push(row?);
            }
            Ok(recipients)
        })
        .await
    }

    async fn claim_batch(&self, batch_id: Uuid, from: &[BatchStatus]) -> Result<bool, StorageError> {
        if from.is_empty() {
            return Ok(false);
        }
        let batch_id = batch_id.to_string();
        let allowed = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let now = Utc::now().timestamp_micros();

        self.with_conn(move |conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE email_batches SET status = ?, updated_at_us = ?
                     WHERE id = ? AND status IN ({})",
                    allowed
                ),
                duckdb::params![BatchStatus::Sending.as_str(), now, batch_id],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn mark_batch_submitted(&self, batch_id: Uuid, provider_id: &str) -> Result<(), StorageError> {
        let batch_id = batch_id.to_string();
        let provider_id = provider_id.to_string();
        let now = Utc::now().timestamp_micros();

        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE email_batches
                 SET status = ?, provider_id = ?, error_status_code = NULL, error_message = NULL,
                     error_data = NULL, updated_at_us = ?
                 WHERE id = ?",
                duckdb::params![BatchStatus::Submitted.as_str(), provider_id, now, batch_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn mark_batch_failed(&self, batch_id: Uuid, failure: &BatchFailure) -> Result<(), StorageError> {
        let batch_id = batch_id.to_string();
        let status_code = failure.status_code.map(i64::from);
        let message = failure.message.clone();
        let data = serde_json::to_string(&failure.data)?;
        let now = Utc::now().timestamp_micros();

        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE email_batches
                 SET status = ?, error_status_code = ?, error_message = ?, error_data = ?, updated_at_us = ?
                 WHERE id = ?",
                duckdb::params![BatchStatus::Failed.as_str(), status_code, message, data, now, batch_id],
            )?;
            Ok(())
        })
        .await
    }
}
