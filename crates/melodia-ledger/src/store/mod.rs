//! SQLite-backed ledger store.
//!
//! Split into focused submodules:
//! - `requests`: song request entries
//! - `users`: connected account upserts

mod requests;
mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use melodia_core::{
    config::LedgerConfig,
    error::BotError,
    records::{
        ConnectedUserRecord, ConnectedUserUpdate, NewSongRequest, RequestStatus,
        SongRequestRecord,
    },
    shellexpand,
    traits::Ledger,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Fixed-width UTC timestamps so text ordering matches time ordering.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Persistent ledger backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the ledger database, running migrations on first use.
    pub async fn new(config: &LedgerConfig) -> Result<Self, BotError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BotError::Ledger(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| BotError::Ledger(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| BotError::Ledger(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("Ledger initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), BotError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| BotError::Ledger(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] =
            &[("001_init", include_str!("../../migrations/001_init.sql"))];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        BotError::Ledger(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| BotError::Ledger(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| BotError::Ledger(format!("failed to record migration {name}: {e}")))?;
        }
        Ok(())
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, BotError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| BotError::Ledger(format!("bad timestamp '{raw}': {e}")))
}

#[async_trait]
impl Ledger for Store {
    async fn create_song_request(
        &self,
        request: NewSongRequest,
    ) -> Result<SongRequestRecord, BotError> {
        self.insert_request(request).await
    }

    async fn list_song_requests(&self, limit: u32) -> Result<Vec<SongRequestRecord>, BotError> {
        self.recent_requests(limit).await
    }

    async fn update_song_request_status(
        &self,
        id: i64,
        status: RequestStatus,
    ) -> Result<(), BotError> {
        self.set_request_status(id, status).await
    }

    async fn upsert_connected_user(
        &self,
        user: ConnectedUserUpdate,
    ) -> Result<ConnectedUserRecord, BotError> {
        self.upsert_user(user).await
    }

    async fn list_connected_users(&self) -> Result<Vec<ConnectedUserRecord>, BotError> {
        self.users_by_last_connected().await
    }
}

#[cfg(test)]
mod tests;
