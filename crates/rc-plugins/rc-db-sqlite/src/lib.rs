//! # rc-db-sqlite Implementation
//!
//! Maps [`ConsentRecord`]s onto a single SQLite table. Decision models and
//! request metadata are stored as JSON text; timestamps as nanoseconds since
//! the epoch so range queries compare integers.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rc_core::models::{ConsentRecord, ConsentStatus, SubjectKey, Validity};
use rc_core::traits::{ConsentStore, Revocation};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS consent_records (
        id               BLOB PRIMARY KEY,
        site_id          TEXT NOT NULL,
        user_id          TEXT NOT NULL,
        status           TEXT NOT NULL,
        start_time       INTEGER NOT NULL,
        end_time         INTEGER,
        decision         TEXT NOT NULL,
        wire_string      TEXT NOT NULL,
        request          TEXT NOT NULL,
        conformance_mode TEXT
    )",
    // The one-valid-record rule, enforced by the database as well.
    "CREATE UNIQUE INDEX IF NOT EXISTS consent_records_one_valid
        ON consent_records (site_id, user_id) WHERE status = 'valid'",
    "CREATE INDEX IF NOT EXISTS consent_records_subject_start
        ON consent_records (site_id, user_id, start_time)",
];

const COLUMNS: &str =
    "id, site_id, user_id, status, start_time, end_time, decision, wire_string, request, conformance_mode";

pub struct SqliteConsentStore {
    pool: SqlitePool,
}

impl SqliteConsentStore {
    /// Connects and creates the schema if needed. In-memory databases are
    /// pinned to one connection, since each connection would otherwise see
    /// its own empty database.
    pub async fn new(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid sqlite url {url}"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

// Helpers for UUID and timestamp conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> anyhow::Result<Uuid> {
    Ok(Uuid::from_slice(blob)?)
}

fn to_nanos(at: DateTime<Utc>) -> anyhow::Result<i64> {
    at.timestamp_nanos_opt()
        .with_context(|| format!("timestamp {at} out of storable range"))
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

fn row_to_record(row: &SqliteRow) -> anyhow::Result<ConsentRecord> {
    let status: String = row.try_get("status")?;
    Ok(ConsentRecord {
        id: blob_to_uuid(row.try_get::<Vec<u8>, _>("id")?.as_slice())?,
        site_id: row.try_get("site_id")?,
        user_id: row.try_get("user_id")?,
        decision: serde_json::from_str(&row.try_get::<String, _>("decision")?)?,
        status: ConsentStatus::parse(&status)
            .with_context(|| format!("unknown consent status {status:?}"))?,
        validity: Validity {
            start_time: from_nanos(row.try_get("start_time")?),
            end_time: row.try_get::<Option<i64>, _>("end_time")?.map(from_nanos),
        },
        wire_string: row.try_get("wire_string")?,
        request: serde_json::from_str(&row.try_get::<String, _>("request")?)?,
        conformance_mode: row.try_get("conformance_mode")?,
    })
}

fn rows_to_records(rows: Vec<SqliteRow>) -> anyhow::Result<Vec<ConsentRecord>> {
    rows.iter().map(row_to_record).collect()
}

#[async_trait]
impl ConsentStore for SqliteConsentStore {
    /// Supersede and insert in one transaction.
    ///
    /// # Developer Note
    /// The partial unique index means a second writer racing us for the same
    /// subject cannot commit a second `valid` row; SQLite serializes the two
    /// transactions and the later one supersedes the earlier one's insert.
    async fn supersede_and_insert(&self, record: ConsentRecord) -> anyhow::Result<Vec<ConsentRecord>> {
        let start = to_nanos(record.validity.start_time)?;
        let mut tx = self.pool.begin().await?;

        // 1. Close out the current valid record(s)
        let superseded = sqlx::query(&format!(
            "UPDATE consent_records SET status = ?, end_time = ?
             WHERE site_id = ? AND user_id = ? AND status = ?
             RETURNING {COLUMNS}"
        ))
        .bind(ConsentStatus::Superseded.as_str())
        .bind(start)
        .bind(&record.site_id)
        .bind(&record.user_id)
        .bind(ConsentStatus::Valid.as_str())
        .fetch_all(&mut *tx)
        .await?;

        // 2. Insert the new record
        sqlx::query(&format!(
            "INSERT INTO consent_records ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(uuid_to_blob(record.id))
        .bind(&record.site_id)
        .bind(&record.user_id)
        .bind(record.status.as_str())
        .bind(start)
        .bind(record.validity.end_time.map(to_nanos).transpose()?)
        .bind(serde_json::to_string(&record.decision)?)
        .bind(&record.wire_string)
        .bind(serde_json::to_string(&record.request)?)
        .bind(&record.conformance_mode)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(record_id = %record.id, superseded = superseded.len(), "sqlite insert committed");
        rows_to_records(superseded)
    }

    async fn revoke_current(
        &self,
        subject: &SubjectKey,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Revocation>> {
        let row = sqlx::query(&format!(
            "UPDATE consent_records SET status = ?, end_time = ?
             WHERE site_id = ? AND user_id = ? AND status = ?
             RETURNING {COLUMNS}"
        ))
        .bind(ConsentStatus::Revoked.as_str())
        .bind(to_nanos(at)?)
        .bind(&subject.site_id)
        .bind(&subject.user_id)
        .bind(ConsentStatus::Valid.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let after = row_to_record(&row)?;
        let mut before = after.clone();
        before.status = ConsentStatus::Valid;
        before.validity.end_time = None;
        Ok(Some(Revocation { before, after }))
    }

    async fn current(&self, subject: &SubjectKey) -> anyhow::Result<Option<ConsentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM consent_records WHERE site_id = ? AND user_id = ? AND status = ?"
        ))
        .bind(&subject.site_id)
        .bind(&subject.user_id)
        .bind(ConsentStatus::Valid.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn get_record(&self, id: Uuid) -> anyhow::Result<Option<ConsentRecord>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM consent_records WHERE id = ?"))
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn history(
        &self,
        subject: &SubjectKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ConsentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM consent_records
             WHERE site_id = ? AND user_id = ?
               AND start_time <= ?
               AND (end_time IS NULL OR end_time >= ?)
             ORDER BY start_time ASC, id ASC"
        ))
        .bind(&subject.site_id)
        .bind(&subject.user_id)
        .bind(to_nanos(end)?)
        .bind(to_nanos(start)?)
        .fetch_all(&self.pool)
        .await?;

        rows_to_records(rows)
    }
}
