//! Relational storage for the loaded feed and the import ledger.
//!
//! [`Store`] wraps a SQLite connection pool. Every operation checks out its
//! own connection or transaction and returns it when dropped.

mod schema;

use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, warn};

pub use schema::{GTFS_TABLES, SCHEMA};

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if needed) the database at `url`, e.g.
    /// `sqlite://departures.db`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!(url, "Connected to database");
        Ok(Self { pool })
    }

    /// A private in-memory database. The pool holds exactly one connection
    /// that is never recycled, since the data lives only as long as it does.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Creates any missing tables and indexes. Run once at startup.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        info!(statements = SCHEMA.len(), "Database schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Timezone of the loaded agency, or `fallback` when no feed has been
    /// loaded yet. All feed times are read in this one zone.
    pub async fn agency_timezone(&self, fallback: Tz) -> Result<Tz, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT agency_timezone FROM agency ORDER BY rowid LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(match row {
            Some((name,)) => name.parse().unwrap_or_else(|_| {
                warn!(timezone = %name, fallback = %fallback, "Stored agency timezone is unknown");
                fallback
            }),
            None => fallback,
        })
    }
}
