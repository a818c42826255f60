//! Shared fixtures for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use melodia_core::{
    error::BotError,
    records::{
        ConnectedUserRecord, ConnectedUserUpdate, NewSongRequest, RequestStatus,
        SongRequestRecord,
    },
    traits::Ledger,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-memory ledger that records every call. Never touches the clock-driven
/// sqlx pool, so it is safe under paused tokio time.
#[derive(Default)]
pub struct MockLedger {
    pub requests: Mutex<Vec<SongRequestRecord>>,
    pub users: Mutex<Vec<ConnectedUserRecord>>,
    /// When true, every call returns a ledger error.
    pub fail: AtomicBool,
}

impl MockLedger {
    pub fn failing() -> Self {
        let ledger = Self::default();
        ledger.fail.store(true, Ordering::SeqCst);
        ledger
    }

    pub fn requests(&self) -> Vec<SongRequestRecord> {
        self.requests.lock().unwrap().clone()
    }

    pub fn users(&self) -> Vec<ConnectedUserRecord> {
        self.users.lock().unwrap().clone()
    }

    pub fn request_status(&self, id: i64) -> Option<RequestStatus> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
    }

    fn check(&self) -> Result<(), BotError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BotError::Ledger("database is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn create_song_request(
        &self,
        request: NewSongRequest,
    ) -> Result<SongRequestRecord, BotError> {
        self.check()?;
        let mut requests = self.requests.lock().unwrap();
        let record = SongRequestRecord {
            id: requests.len() as i64 + 1,
            phone_number: request.phone_number,
            query: request.query,
            status: request.status,
            requested_at: Utc::now(),
            is_group: request.is_group,
            group_name: request.group_name,
        };
        requests.push(record.clone());
        Ok(record)
    }

    async fn list_song_requests(&self, limit: u32) -> Result<Vec<SongRequestRecord>, BotError> {
        self.check()?;
        let mut requests = self.requests();
        requests.reverse();
        requests.truncate(limit as usize);
        Ok(requests)
    }

    async fn update_song_request_status(
        &self,
        id: i64,
        status: RequestStatus,
    ) -> Result<(), BotError> {
        self.check()?;
        let mut requests = self.requests.lock().unwrap();
        match requests.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.status = status;
                Ok(())
            }
            None => Err(BotError::Ledger(format!("song request {id} not found"))),
        }
    }

    async fn upsert_connected_user(
        &self,
        user: ConnectedUserUpdate,
    ) -> Result<ConnectedUserRecord, BotError> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        let next_id = users.len() as i64 + 1;
        let record = match users.iter_mut().find(|u| u.phone_number == user.phone_number) {
            Some(existing) => {
                existing.status = user.status;
                if user.pairing_code.is_some() {
                    existing.pairing_code = user.pairing_code;
                }
                existing.last_connected = Utc::now();
                existing.clone()
            }
            None => {
                let record = ConnectedUserRecord {
                    id: next_id,
                    phone_number: user.phone_number,
                    status: user.status,
                    pairing_code: user.pairing_code,
                    last_connected: Utc::now(),
                };
                users.push(record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn list_connected_users(&self) -> Result<Vec<ConnectedUserRecord>, BotError> {
        self.check()?;
        let mut users = self.users();
        users.sort_by(|a, b| b.last_connected.cmp(&a.last_connected));
        Ok(users)
    }
}
