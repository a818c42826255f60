//! Song request inserts, listing, and status updates.

use super::{format_timestamp, parse_timestamp, Store};
use chrono::Utc;
use melodia_core::{
    error::BotError,
    records::{NewSongRequest, RequestStatus, SongRequestRecord},
};
use std::str::FromStr;
use tracing::debug;

type RequestRow = (i64, String, String, String, String, bool, Option<String>);

fn row_to_record(row: RequestRow) -> Result<SongRequestRecord, BotError> {
    let (id, phone_number, query, status, requested_at, is_group, group_name) = row;
    Ok(SongRequestRecord {
        id,
        phone_number,
        query,
        status: RequestStatus::from_str(&status).map_err(BotError::Ledger)?,
        requested_at: parse_timestamp(&requested_at)?,
        is_group,
        group_name,
    })
}

impl Store {
    pub(super) async fn insert_request(
        &self,
        request: NewSongRequest,
    ) -> Result<SongRequestRecord, BotError> {
        let requested_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO song_requests \
             (phone_number, query, status, requested_at, is_group, group_name) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.phone_number)
        .bind(&request.query)
        .bind(request.status.as_str())
        .bind(format_timestamp(requested_at))
        .bind(request.is_group)
        .bind(&request.group_name)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Ledger(format!("create song request failed: {e}")))?;

        let id = result.last_insert_rowid();
        debug!(
            "ledger: request {id} from {} [{}]",
            request.phone_number,
            request.status.as_str()
        );

        self.request_by_id(id).await
    }

    pub(super) async fn request_by_id(&self, id: i64) -> Result<SongRequestRecord, BotError> {
        let row: RequestRow = sqlx::query_as(
            "SELECT id, phone_number, query, status, requested_at, is_group, group_name \
             FROM song_requests WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BotError::Ledger(format!("get song request {id} failed: {e}")))?;

        row_to_record(row)
    }

    pub(super) async fn recent_requests(
        &self,
        limit: u32,
    ) -> Result<Vec<SongRequestRecord>, BotError> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT id, phone_number, query, status, requested_at, is_group, group_name \
             FROM song_requests ORDER BY requested_at DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BotError::Ledger(format!("list song requests failed: {e}")))?;

        rows.into_iter().map(row_to_record).collect()
    }

    pub(super) async fn set_request_status(
        &self,
        id: i64,
        status: RequestStatus,
    ) -> Result<(), BotError> {
        let result = sqlx::query("UPDATE song_requests SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| BotError::Ledger(format!("update song request {id} failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(BotError::Ledger(format!("song request {id} not found")));
        }
        Ok(())
    }
}
