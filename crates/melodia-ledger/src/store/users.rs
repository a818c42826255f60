//! Connected account upserts keyed by phone number.

use super::{format_timestamp, parse_timestamp, Store};
use chrono::Utc;
use melodia_core::{
    error::BotError,
    records::{ConnectedUserRecord, ConnectedUserUpdate, UserStatus},
};
use std::str::FromStr;

type UserRow = (i64, String, String, Option<String>, String);

fn row_to_record(row: UserRow) -> Result<ConnectedUserRecord, BotError> {
    let (id, phone_number, status, pairing_code, last_connected) = row;
    Ok(ConnectedUserRecord {
        id,
        phone_number,
        status: UserStatus::from_str(&status).map_err(BotError::Ledger)?,
        pairing_code,
        last_connected: parse_timestamp(&last_connected)?,
    })
}

impl Store {
    pub(super) async fn upsert_user(
        &self,
        user: ConnectedUserUpdate,
    ) -> Result<ConnectedUserRecord, BotError> {
        sqlx::query(
            "INSERT INTO connected_users (phone_number, status, pairing_code, last_connected) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(phone_number) DO UPDATE SET \
                status = excluded.status, \
                pairing_code = COALESCE(excluded.pairing_code, connected_users.pairing_code), \
                last_connected = excluded.last_connected",
        )
        .bind(&user.phone_number)
        .bind(user.status.as_str())
        .bind(&user.pairing_code)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Ledger(format!("upsert user failed: {e}")))?;

        let row: UserRow = sqlx::query_as(
            "SELECT id, phone_number, status, pairing_code, last_connected \
             FROM connected_users WHERE phone_number = ?",
        )
        .bind(&user.phone_number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BotError::Ledger(format!("get user failed: {e}")))?;

        tracing::info!(
            "ledger: {} marked {}",
            user.phone_number,
            user.status.as_str()
        );

        row_to_record(row)
    }

    pub(super) async fn users_by_last_connected(
        &self,
    ) -> Result<Vec<ConnectedUserRecord>, BotError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, phone_number, status, pairing_code, last_connected \
             FROM connected_users ORDER BY last_connected DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BotError::Ledger(format!("list users failed: {e}")))?;

        rows.into_iter().map(row_to_record).collect()
    }
}
