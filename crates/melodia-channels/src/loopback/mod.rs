//! Loopback transport: an in-process simulated messaging network.
//!
//! Behaves like a linked-device client: a fresh instance either resumes from
//! persisted credentials or issues a QR challenge / pairing code, and the
//! "remote side" (tests, the development API) drives linking, drops, and
//! inbound messages through the helper methods.
//! Credentials are persisted to `{data_dir}/session/credentials.json`.

mod credentials;


pub use credentials::Credentials;

use async_trait::async_trait;
use credentials::CredentialStore;
use melodia_core::{
    error::BotError,
    message::{AuthMethod, CloseReason, InboundMessage, MessageHandle, TransportEvent},
    traits::Transport,
};
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Server suffix used for simulated account addresses.
pub const SERVER: &str = "s.loopback.net";

/// Pairing code alphabet (no 0/O or 1/I lookalikes).
const PAIRING_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTVWXYZ";

/// A message the transport delivered or edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub handle: MessageHandle,
    pub text: String,
}

#[derive(Debug)]
struct PendingPairing {
    phone_number: String,
    code: String,
}

#[derive(Default)]
struct LoopbackState {
    credentials: CredentialStore,
    /// Event sink of the live instance; `None` when terminated or dropped.
    events: Option<mpsc::Sender<TransportEvent>>,
    pending_pairing: Option<PendingPairing>,
    /// Latest content per message id, for edit validation.
    contents: HashMap<String, String>,
    sent: Vec<SentMessage>,
    edits: Vec<SentMessage>,
    reject_edits: bool,
    fail_pairing: bool,
}

/// In-process transport used for development and tests.
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
    instances: AtomicU64,
}

impl LoopbackTransport {
    /// Transport whose credentials live only in memory.
    pub fn in_memory() -> Self {
        Self::with_credentials_path(None)
    }

    /// Transport persisting credentials under `{data_dir}/session/`.
    pub fn from_data_dir(data_dir: &str) -> Self {
        let dir = melodia_core::shellexpand(data_dir);
        let path = PathBuf::from(dir).join("session").join("credentials.json");
        Self::with_credentials_path(Some(path))
    }

    fn with_credentials_path(path: Option<PathBuf>) -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                credentials: CredentialStore::open(path),
                ..Default::default()
            }),
            instances: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn emit(&self, event: TransportEvent) -> Result<(), BotError> {
        let tx = self
            .lock()
            .events
            .clone()
            .ok_or_else(|| BotError::Transport("loopback transport not connected".into()))?;
        tx.send(event)
            .await
            .map_err(|_| BotError::Transport("loopback event receiver dropped".into()))
    }

    /// How many connection instances have been created so far.
    pub fn instance_count(&self) -> u64 {
        self.instances.load(Ordering::SeqCst)
    }

    /// Whether an instance is currently live.
    pub fn is_live(&self) -> bool {
        self.lock().events.is_some()
    }

    /// Phone number of the linked account, if any.
    pub fn linked_account(&self) -> Option<String> {
        self.lock()
            .credentials
            .get()
            .map(|c| c.phone_number.clone())
    }

    /// Every message sent so far, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Every successful edit so far, in order.
    pub fn edits(&self) -> Vec<SentMessage> {
        self.lock().edits.clone()
    }

    /// Make every subsequent edit fail (e.g. message deleted on the remote side).
    pub fn set_reject_edits(&self, reject: bool) {
        self.lock().reject_edits = reject;
    }

    /// Make every subsequent pairing-code request fail.
    pub fn set_fail_pairing(&self, fail: bool) {
        self.lock().fail_pairing = fail;
    }

    /// Simulate the phone scanning the QR (or accepting the code) for `phone_number`.
    pub async fn link(&self, phone_number: &str) -> Result<(), BotError> {
        {
            let mut state = self.lock();
            state.credentials.save(phone_number)?;
            state.pending_pairing = None;
        }
        info!("loopback: linked {phone_number}");
        self.emit(TransportEvent::Opened {
            identity: format!("{phone_number}:1@{SERVER}"),
        })
        .await
    }

    /// Simulate entering a pairing code on the phone.
    pub async fn redeem_pairing_code(&self, code: &str) -> Result<(), BotError> {
        let phone = {
            let state = self.lock();
            match state.pending_pairing {
                Some(ref p) if p.code == code => p.phone_number.clone(),
                _ => return Err(BotError::Validation(format!("unknown pairing code {code}"))),
            }
        };
        self.link(&phone).await
    }

    /// Issue a new QR challenge on the live instance (the network rotates them).
    pub async fn rotate_qr(&self) -> Result<String, BotError> {
        let challenge = qr_challenge();
        self.emit(TransportEvent::QrIssued(challenge.clone())).await?;
        Ok(challenge)
    }

    /// Simulate the remote side closing the connection.
    pub async fn drop_connection(&self, reason: CloseReason) -> Result<(), BotError> {
        info!("loopback: closing connection ({reason})");
        let tx = {
            let mut state = self.lock();
            if reason.is_logout() {
                state.credentials.clear();
            }
            state.events.take()
        }
        .ok_or_else(|| BotError::Transport("loopback transport not connected".into()))?;
        tx.send(TransportEvent::Closed(reason))
            .await
            .map_err(|_| BotError::Transport("loopback event receiver dropped".into()))
    }

    /// Deliver an inbound message to the live instance.
    pub async fn inject(&self, message: InboundMessage) -> Result<(), BotError> {
        self.emit(TransportEvent::Message(message)).await
    }
}

/// Random QR payload in the `ref,publicKey,identityKey,advSecret` shape.
fn qr_challenge() -> String {
    let mut rng = rand::thread_rng();
    let mut part = |len: usize| -> String {
        (0..len)
            .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
            .collect()
    };
    format!("2@{},{},{},{}", part(32), part(44), part(44), part(24))
}

fn pairing_code() -> String {
    let mut rng = rand::thread_rng();
    let chars: String = (0..8)
        .map(|_| PAIRING_ALPHABET[rng.gen_range(0..PAIRING_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", &chars[..4], &chars[4..])
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn connect(
        &self,
        method: AuthMethod,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), BotError> {
        let instance = self.instances.fetch_add(1, Ordering::SeqCst) + 1;
        let resume = {
            let mut state = self.lock();
            state.events = Some(events);
            state.pending_pairing = None;
            state.credentials.get().map(|c| c.phone_number.clone())
        };
        debug!("loopback: instance {instance} connecting ({method:?})");

        match (resume, method) {
            (Some(phone), _) => {
                self.emit(TransportEvent::Opened {
                    identity: format!("{phone}:1@{SERVER}"),
                })
                .await
            }
            (None, AuthMethod::Qr) => self.rotate_qr().await.map(|_| ()),
            // Waits for `request_pairing_code` + `redeem_pairing_code`.
            (None, AuthMethod::PairingCode { .. }) => Ok(()),
        }
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, BotError> {
        let mut state = self.lock();
        if state.events.is_none() {
            return Err(BotError::Transport("loopback transport not connected".into()));
        }
        if state.fail_pairing {
            return Err(BotError::Transport("pairing code request rejected".into()));
        }
        let code = pairing_code();
        state.pending_pairing = Some(PendingPairing {
            phone_number: phone_number.to_string(),
            code: code.clone(),
        });
        info!("loopback: pairing code issued for {phone_number}");
        Ok(code)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<MessageHandle, BotError> {
        let mut state = self.lock();
        if state.events.is_none() || state.credentials.get().is_none() {
            return Err(BotError::Transport("loopback transport not connected".into()));
        }
        let handle = MessageHandle {
            conversation_id: conversation_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
        };
        state
            .contents
            .insert(handle.message_id.clone(), text.to_string());
        state.sent.push(SentMessage {
            handle: handle.clone(),
            text: text.to_string(),
        });
        Ok(handle)
    }

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> Result<(), BotError> {
        let mut state = self.lock();
        if state.events.is_none() {
            return Err(BotError::Transport("loopback transport not connected".into()));
        }
        if state.reject_edits {
            return Err(BotError::Transport(format!(
                "edit rejected for message {}",
                handle.message_id
            )));
        }
        match state.contents.get_mut(&handle.message_id) {
            Some(content) => *content = text.to_string(),
            None => {
                return Err(BotError::Transport(format!(
                    "message {} not found",
                    handle.message_id
                )))
            }
        }
        state.edits.push(SentMessage {
            handle: handle.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn logout(&self) -> Result<(), BotError> {
        let tx = {
            let mut state = self.lock();
            state.credentials.clear();
            state.pending_pairing = None;
            state.events.clone()
        };
        info!("loopback: logged out");
        if let Some(tx) = tx {
            if tx
                .send(TransportEvent::Closed(CloseReason::LoggedOut))
                .await
                .is_err()
            {
                warn!("loopback: logout event not delivered");
            }
        }
        Ok(())
    }

    async fn terminate(&self) -> Result<(), BotError> {
        let mut state = self.lock();
        state.events = None;
        state.pending_pairing = None;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
