use crate::{
    error::BotError,
    message::{AuthMethod, MessageHandle, TransportEvent},
    records::{
        ConnectedUserRecord, ConnectedUserUpdate, NewSongRequest, RequestStatus,
        SongRequestRecord,
    },
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Messaging transport trait -- the boundary to the network client library.
///
/// Each successful `connect()` creates a new underlying connection instance
/// that reports connection events and inbound messages through `events`.
/// `terminate()` drops the current instance without logging out.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name.
    fn name(&self) -> &str;

    /// Start authenticating a fresh connection instance.
    async fn connect(
        &self,
        method: AuthMethod,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), BotError>;

    /// Request a pairing code for a normalized phone number on the current instance.
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, BotError>;

    /// Send a text message and return a handle that can be edited later.
    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<MessageHandle, BotError>;

    /// Replace the content of a previously sent message.
    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> Result<(), BotError>;

    /// Log the account out, invalidating persisted credentials.
    async fn logout(&self) -> Result<(), BotError>;

    /// Drop the current connection instance.
    async fn terminate(&self) -> Result<(), BotError>;

    /// Downcast support for adapter-specific controls.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Ledger trait -- persistence of song requests and connected accounts.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create_song_request(
        &self,
        request: NewSongRequest,
    ) -> Result<SongRequestRecord, BotError>;

    /// Most recent requests first.
    async fn list_song_requests(&self, limit: u32) -> Result<Vec<SongRequestRecord>, BotError>;

    async fn update_song_request_status(
        &self,
        id: i64,
        status: RequestStatus,
    ) -> Result<(), BotError>;

    async fn upsert_connected_user(
        &self,
        user: ConnectedUserUpdate,
    ) -> Result<ConnectedUserRecord, BotError>;

    /// Most recently connected first.
    async fn list_connected_users(&self) -> Result<Vec<ConnectedUserRecord>, BotError>;
}
