//! Append-only log of feed load attempts.
//!
//! Every attempt appends one row: successful loads inside the same
//! transaction that replaces the feed, failed loads on their own after the
//! rollback. Timestamps are stored in UTC and only converted to the agency
//! timezone when read back.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::{Executor, Sqlite};
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::store::Store;

/// Number of records returned by the ledger read path.
pub const RECENT_IMPORTS: i64 = 5;

const LOCAL_FORMAT: &str = "%Y-%m-%d %-I:%M:%S%p %Z";

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ImportRecord {
    pub id: i64,
    pub imported_at: DateTime<Utc>,
    pub url: String,
    pub success: bool,
    pub error: Option<String>,
}

/// An [`ImportRecord`] with its timestamp rendered in the agency timezone.
#[derive(Debug, Clone, Serialize)]
pub struct ImportView {
    #[serde(flatten)]
    pub record: ImportRecord,
    pub imported_at_local: String,
}

impl ImportView {
    pub fn new(record: ImportRecord, tz: &Tz) -> Self {
        let imported_at_local = record
            .imported_at
            .with_timezone(tz)
            .format(LOCAL_FORMAT)
            .to_string();
        Self {
            record,
            imported_at_local,
        }
    }
}

pub async fn record_success<'e, E>(executor: E, url: &str) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    append(executor, url, true, None).await
}

pub async fn record_failure<'e, E>(executor: E, url: &str, error: &str) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    append(executor, url, false, Some(error)).await
}

async fn append<'e, E>(
    executor: E,
    url: &str,
    success: bool,
    error: Option<&str>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO imports (imported_at, url, success, error) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(Utc::now())
    .bind(url)
    .bind(success)
    .bind(error)
    .fetch_one(executor)
    .await?;

    debug!(id, url, success, "Recorded import attempt");
    Ok(id)
}

/// Read side of the ledger.
#[derive(Clone, Debug)]
pub struct ImportLedger {
    store: Store,
    fallback_timezone: Tz,
    api_key: Option<String>,
}

impl ImportLedger {
    /// `api_key`, when set, must be presented to
    /// [`ImportLedger::authorized_recent_imports`].
    pub fn new(store: Store, fallback_timezone: Tz, api_key: Option<String>) -> Self {
        Self {
            store,
            fallback_timezone,
            api_key,
        }
    }

    /// The `limit` most recent attempts, newest first.
    pub async fn recent_imports(&self, limit: i64) -> Result<Vec<ImportView>, LedgerError> {
        let tz = self.store.agency_timezone(self.fallback_timezone).await?;

        let records: Vec<ImportRecord> = sqlx::query_as(
            "SELECT id, imported_at, url, success, error FROM imports ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.store.pool())
        .await?;

        Ok(records
            .into_iter()
            .map(|record| ImportView::new(record, &tz))
            .collect())
    }

    /// [`RECENT_IMPORTS`] most recent attempts, gated on the configured key.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Unauthorized`] when a key is configured and `provided`
    /// is missing or different. An authorized read of an empty ledger is
    /// `Ok` with no records.
    pub async fn authorized_recent_imports(
        &self,
        provided: Option<&str>,
    ) -> Result<Vec<ImportView>, LedgerError> {
        if let Some(expected) = &self.api_key {
            if provided != Some(expected.as_str()) {
                warn!("Rejected ledger read with missing or wrong key");
                return Err(LedgerError::Unauthorized);
            }
        }
        self.recent_imports(RECENT_IMPORTS).await
    }
}
