//! Messaging session lifecycle.
//!
//! `SessionManager` owns the single logical connection to the messaging
//! network and moves it through `disconnected → connecting → open`.
//! Explicit operations (`connect`, `pair`, `disconnect`) are serialized by one
//! async mutex. Transport events flow through a typed channel into a single
//! event loop; every event carries the generation of the transport instance
//! that produced it, and events from replaced instances are dropped.
//!
//! After an unexpected close the manager reconnects on its own: immediately
//! the first time, then with doubling delays until a connection stays open
//! for the configured stability window. A logout is final until the next
//! explicit `connect` or `pair`.

#[cfg(test)]
mod tests;

use crate::playback::PlaybackScheduler;
use melodia_core::{
    config::SessionConfig,
    error::BotError,
    message::{phone_part, AuthMethod, CloseReason, InboundMessage, TransportEvent},
    records::{ConnectedUserUpdate, UserStatus},
    traits::{Ledger, Transport},
};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Buffer size of the event and inbound-message channels.
const EVENT_BUFFER: usize = 64;

/// Connection lifecycle state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
}

impl ConnectionState {
    /// Label reported by the admin API.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "connected",
        }
    }
}

/// Published snapshot of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    /// Latest QR challenge while authenticating by QR.
    pub qr_challenge: Option<String>,
    /// Bare phone number of the linked account while open.
    pub identity: Option<String>,
}

/// Receivers handed to the loops that drive the manager.
pub struct SessionStreams {
    /// Generation-tagged transport events, for `run_events`.
    pub events: mpsc::Receiver<(u64, TransportEvent)>,
    /// Inbound chat messages of the live instance, for the dispatcher.
    pub inbound: mpsc::Receiver<InboundMessage>,
}

#[derive(Default)]
struct Session {
    state: ConnectionState,
    qr_challenge: Option<String>,
    /// Phone number of an in-flight pairing-code flow.
    pairing_target: Option<String>,
    pairing_code: Option<String>,
    identity: Option<String>,
    /// When the current instance opened.
    opened_at: Option<Instant>,
    generation: u64,
    /// Closes since the last stable open; drives the reconnect delay.
    failures: u32,
    reconnect: Option<CancellationToken>,
}

impl Session {
    fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            qr_challenge: self.qr_challenge.clone(),
            identity: self.identity.clone(),
        }
    }

    fn cancel_reconnect(&mut self) -> bool {
        match self.reconnect.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Back to `disconnected`, invalidating the current instance's events.
    /// Returns the identity that was linked, if any.
    fn reset(&mut self) -> Option<String> {
        self.state = ConnectionState::Disconnected;
        self.generation += 1;
        self.qr_challenge = None;
        self.pairing_target = None;
        self.pairing_code = None;
        self.opened_at = None;
        self.identity.take()
    }
}

/// Keep ASCII digits only; the result must be 7 to 15 digits long.
pub fn normalize_phone(raw: &str) -> Result<String, BotError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if !(7..=15).contains(&digits.len()) {
        return Err(BotError::Validation(format!(
            "invalid phone number '{raw}': expected 7 to 15 digits"
        )));
    }
    Ok(digits)
}

/// Supervisor of the messaging session.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    ledger: Arc<dyn Ledger>,
    playback: Arc<PlaybackScheduler>,
    config: SessionConfig,
    ops: tokio::sync::Mutex<()>,
    session: Mutex<Session>,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: mpsc::Sender<(u64, TransportEvent)>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        ledger: Arc<dyn Ledger>,
        playback: Arc<PlaybackScheduler>,
        config: SessionConfig,
    ) -> (Arc<Self>, SessionStreams) {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (inbound_tx, inbound) = mpsc::channel(EVENT_BUFFER);
        let manager = Arc::new(Self {
            transport,
            ledger,
            playback,
            config,
            ops: tokio::sync::Mutex::new(()),
            session: Mutex::new(Session::default()),
            status_tx,
            events_tx,
            inbound_tx,
        });
        (manager, SessionStreams { events, inbound })
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, session: &Session) {
        self.status_tx.send_replace(session.snapshot());
    }

    /// Last published snapshot. Never waits on an in-flight operation.
    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Start authenticating (persisted credentials or QR). No-op unless
    /// disconnected.
    pub async fn connect(&self) -> Result<(), BotError> {
        let _ops = self.ops.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> Result<(), BotError> {
        let state = self.lock().state;
        if state != ConnectionState::Disconnected {
            debug!("session: connect ignored, already {}", state.as_api_str());
            return Ok(());
        }
        self.begin_instance(AuthMethod::Qr).await
    }

    /// Create a fresh transport instance and enter `connecting`.
    async fn begin_instance(&self, method: AuthMethod) -> Result<(), BotError> {
        let (tx, mut rx) = mpsc::channel::<TransportEvent>(EVENT_BUFFER);
        let generation = {
            let mut session = self.lock();
            session.cancel_reconnect();
            session.generation += 1;
            session.state = ConnectionState::Connecting;
            session.qr_challenge = None;
            session.identity = None;
            session.pairing_code = None;
            session.pairing_target = match &method {
                AuthMethod::PairingCode { phone_number } => Some(phone_number.clone()),
                AuthMethod::Qr => None,
            };
            self.publish(&session);
            session.generation
        };

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if events.send((generation, event)).await.is_err() {
                    break;
                }
            }
        });

        info!(
            "session: connecting via {} (instance {generation})",
            self.transport.name()
        );
        if let Err(e) = self.transport.connect(method, tx).await {
            warn!("session: transport connect failed: {e}");
            let mut session = self.lock();
            if session.generation == generation {
                session.reset();
                self.publish(&session);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Link by pairing code. Returns the code to show to the user; the
    /// connection keeps opening in the background.
    pub async fn pair(&self, phone_number: &str) -> Result<String, BotError> {
        let phone = normalize_phone(phone_number)?;
        let _ops = self.ops.lock().await;
        {
            let session = self.lock();
            if session.state == ConnectionState::Open {
                return Err(BotError::StateConflict("session is already connected".into()));
            }
            if session.pairing_target.is_some() {
                return Err(BotError::StateConflict(
                    "a pairing is already in progress".into(),
                ));
            }
        }

        if let Err(e) = self.transport.terminate().await {
            warn!("session: terminate before pairing failed: {e}");
        }
        self.begin_instance(AuthMethod::PairingCode {
            phone_number: phone.clone(),
        })
        .await?;

        match self.transport.request_pairing_code(&phone).await {
            Ok(code) => {
                let mut session = self.lock();
                session.pairing_code = Some(code.clone());
                info!("session: pairing code issued for {phone}");
                Ok(code)
            }
            Err(e) => {
                warn!("session: pairing code request failed: {e}");
                if let Err(e) = self.transport.terminate().await {
                    warn!("session: terminate after failed pairing failed: {e}");
                }
                let mut session = self.lock();
                session.reset();
                self.publish(&session);
                Err(e)
            }
        }
    }

    /// Log out and stay down. No-op when already disconnected.
    pub async fn disconnect(&self) -> Result<(), BotError> {
        let _ops = self.ops.lock().await;
        {
            let mut session = self.lock();
            if session.cancel_reconnect() {
                debug!("session: pending reconnect cancelled");
            }
            if session.state == ConnectionState::Disconnected {
                return Ok(());
            }
            // Events from the instance being logged out are stale from here on.
            session.generation += 1;
        }

        let logout = self.transport.logout().await;
        if let Err(ref e) = logout {
            warn!("session: logout failed: {e}");
        }
        if let Err(e) = self.transport.terminate().await {
            warn!("session: terminate failed: {e}");
        }

        let identity = {
            let mut session = self.lock();
            let identity = session.reset();
            session.failures = 0;
            self.publish(&session);
            identity
        };
        self.playback.cancel_all();
        info!("session: disconnected");

        if let Some(phone) = identity {
            self.record_user(&phone, UserStatus::Disconnected, None).await;
        }
        logout
    }

    /// Consume generation-tagged transport events until the channel closes.
    pub async fn run_events(self: Arc<Self>, mut events: mpsc::Receiver<(u64, TransportEvent)>) {
        while let Some((generation, event)) = events.recv().await {
            match event {
                TransportEvent::QrIssued(challenge) => self.on_qr(generation, challenge),
                TransportEvent::Opened { identity } => self.on_opened(generation, &identity).await,
                TransportEvent::Closed(reason) => self.on_closed(generation, reason).await,
                TransportEvent::Message(message) => self.on_message(generation, message).await,
            }
        }
    }

    fn on_qr(&self, generation: u64, challenge: String) {
        let mut session = self.lock();
        if session.generation != generation || session.state != ConnectionState::Connecting {
            debug!("session: stale QR challenge dropped");
            return;
        }
        session.qr_challenge = Some(challenge);
        self.publish(&session);
        info!("session: QR challenge ready");
    }

    async fn on_opened(&self, generation: u64, identity: &str) {
        let (phone, pairing_code) = {
            let mut session = self.lock();
            if session.generation != generation {
                debug!("session: stale open event dropped");
                return;
            }
            let phone = phone_part(identity).to_string();
            session.state = ConnectionState::Open;
            session.identity = Some(phone.clone());
            session.qr_challenge = None;
            session.pairing_target = None;
            session.opened_at = Some(Instant::now());
            let code = session.pairing_code.take();
            self.publish(&session);
            (phone, code)
        };
        info!("session: connected as {phone}");
        self.record_user(&phone, UserStatus::Connected, pairing_code)
            .await;
    }

    async fn on_closed(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        let identity = {
            let mut session = self.lock();
            if session.generation != generation {
                debug!("session: stale close event dropped ({reason})");
                return;
            }
            let stable = session
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.stable_after());
            let identity = session.reset();
            if reason.is_logout() || stable {
                session.failures = 0;
            }
            if !reason.is_logout() {
                self.schedule_reconnect(&mut session);
            }
            self.publish(&session);
            identity
        };
        self.playback.cancel_all();

        if reason.is_logout() {
            info!("session: logged out, not reconnecting");
            if let Some(phone) = identity {
                self.record_user(&phone, UserStatus::Disconnected, None).await;
            }
        } else {
            warn!("session: connection closed ({reason})");
        }
    }

    async fn on_message(&self, generation: u64, message: InboundMessage) {
        if self.lock().generation != generation {
            debug!("session: message from stale instance dropped");
            return;
        }
        if self.inbound_tx.send(message).await.is_err() {
            warn!("session: inbound receiver dropped");
        }
    }

    /// Arm a reconnect after the backoff delay. The caller holds the session lock.
    fn schedule_reconnect(self: &Arc<Self>, session: &mut Session) {
        let delay = self.config.reconnect_delay(session.failures);
        session.failures = session.failures.saturating_add(1);
        let token = CancellationToken::new();
        session.cancel_reconnect();
        session.reconnect = Some(token.clone());
        info!("session: reconnecting in {delay:?}");

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let _ops = manager.ops.lock().await;
            if token.is_cancelled() {
                return;
            }
            if let Err(e) = manager.connect_locked().await {
                warn!("session: reconnect failed: {e}");
                let mut session = manager.lock();
                if session.state == ConnectionState::Disconnected {
                    manager.schedule_reconnect(&mut session);
                }
            }
        });
    }

    async fn record_user(&self, phone: &str, status: UserStatus, pairing_code: Option<String>) {
        let update = ConnectedUserUpdate {
            phone_number: phone.to_string(),
            status,
            pairing_code,
        };
        if let Err(e) = self.ledger.upsert_connected_user(update).await {
            warn!("session: failed to record {phone} as {}: {e}", status.as_str());
        }
    }
}
