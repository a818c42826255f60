use super::*;
use crate::test_support::MockLedger;
use melodia_channels::LoopbackTransport;
use melodia_core::config::PlaybackConfig;
use melodia_core::message::MessageHandle;
use crate::playback::NewJob;
use std::time::Duration;

struct Harness {
    manager: Arc<SessionManager>,
    transport: Arc<LoopbackTransport>,
    ledger: Arc<MockLedger>,
    playback: Arc<PlaybackScheduler>,
    inbound: mpsc::Receiver<InboundMessage>,
}

fn harness() -> Harness {
    let transport = Arc::new(LoopbackTransport::in_memory());
    let ledger = Arc::new(MockLedger::default());
    let playback = Arc::new(PlaybackScheduler::new(
        transport.clone(),
        ledger.clone(),
        PlaybackConfig::default(),
    ));
    let (manager, streams) = SessionManager::new(
        transport.clone(),
        ledger.clone(),
        playback.clone(),
        SessionConfig {
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 8_000,
            stable_after_ms: 10_000,
        },
    );
    tokio::spawn(manager.clone().run_events(streams.events));
    Harness {
        manager,
        transport,
        ledger,
        playback,
        inbound: streams.inbound,
    }
}

async fn wait_for(manager: &SessionManager, pred: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
    let mut rx = manager.subscribe();
    let status = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for session status")
        .unwrap()
        .clone();
    status
}

async fn wait_state(manager: &SessionManager, state: ConnectionState) -> SessionStatus {
    wait_for(manager, |s| s.state == state).await
}

async fn open_session(h: &Harness) {
    h.manager.connect().await.unwrap();
    wait_for(&h.manager, |s| s.qr_challenge.is_some()).await;
    h.transport.link("15551234567").await.unwrap();
    wait_state(&h.manager, ConnectionState::Open).await;
}

// --- phone normalization ---

#[test]
fn test_normalize_phone_keeps_digits_only() {
    assert_eq!(normalize_phone("+1 (555) 123-4567").unwrap(), "15551234567");
    assert_eq!(normalize_phone("5551234").unwrap(), "5551234");
}

#[test]
fn test_normalize_phone_rejects_bad_lengths() {
    assert!(matches!(normalize_phone(""), Err(BotError::Validation(_))));
    assert!(matches!(normalize_phone("+1 555"), Err(BotError::Validation(_))));
    assert!(matches!(
        normalize_phone("1234567890123456"),
        Err(BotError::Validation(_))
    ));
    assert!(matches!(normalize_phone("abc"), Err(BotError::Validation(_))));
}

#[test]
fn test_api_state_labels() {
    assert_eq!(ConnectionState::Disconnected.as_api_str(), "disconnected");
    assert_eq!(ConnectionState::Connecting.as_api_str(), "connecting");
    assert_eq!(ConnectionState::Open.as_api_str(), "connected");
}

// --- connect ---

#[tokio::test]
async fn test_initial_status_is_disconnected() {
    let h = harness();
    assert_eq!(h.manager.status(), SessionStatus::default());
}

#[tokio::test]
async fn test_connect_issues_qr_and_is_idempotent() {
    let h = harness();
    h.manager.connect().await.unwrap();
    let status = wait_for(&h.manager, |s| s.qr_challenge.is_some()).await;
    assert_eq!(status.state, ConnectionState::Connecting);
    assert_eq!(h.transport.instance_count(), 1);

    h.manager.connect().await.unwrap();
    assert_eq!(h.transport.instance_count(), 1);
    assert_eq!(h.manager.status(), status);
}

#[tokio::test]
async fn test_newer_qr_replaces_older() {
    let h = harness();
    h.manager.connect().await.unwrap();
    let first = wait_for(&h.manager, |s| s.qr_challenge.is_some()).await;
    let second = h.transport.rotate_qr().await.unwrap();
    let status = wait_for(&h.manager, |s| s.qr_challenge.as_deref() == Some(&second)).await;
    assert_ne!(first.qr_challenge, status.qr_challenge);
}

#[tokio::test]
async fn test_open_normalizes_identity_and_records_user() {
    let h = harness();
    open_session(&h).await;

    let status = h.manager.status();
    assert_eq!(status.identity.as_deref(), Some("15551234567"));
    assert!(status.qr_challenge.is_none());

    let users = h.ledger.users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].phone_number, "15551234567");
    assert_eq!(users[0].status, UserStatus::Connected);

    h.manager.connect().await.unwrap();
    assert_eq!(h.transport.instance_count(), 1);
}

#[tokio::test]
async fn test_status_does_not_wait_on_operations() {
    let h = harness();
    let _ops = h.manager.ops.lock().await;
    assert_eq!(h.manager.status().state, ConnectionState::Disconnected);
}

// --- close and reconnect ---

#[tokio::test]
async fn test_logged_out_close_does_not_reconnect() {
    let h = harness();
    open_session(&h).await;

    h.transport
        .drop_connection(CloseReason::LoggedOut)
        .await
        .unwrap();
    let status = wait_state(&h.manager, ConnectionState::Disconnected).await;
    assert!(status.identity.is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.manager.status().state, ConnectionState::Disconnected);
    assert_eq!(h.transport.instance_count(), 1);
    assert_eq!(h.ledger.users()[0].status, UserStatus::Disconnected);
}

#[tokio::test]
async fn test_network_close_reconnects_and_resumes() {
    let h = harness();
    open_session(&h).await;

    h.transport
        .drop_connection(CloseReason::ConnectionLost("reset by peer".into()))
        .await
        .unwrap();
    wait_for(&h.manager, |_| h.transport.instance_count() == 2).await;
    let status = wait_state(&h.manager, ConnectionState::Open).await;
    assert_eq!(status.identity.as_deref(), Some("15551234567"));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_closes_back_off() {
    let h = harness();
    h.manager.connect().await.unwrap();
    wait_for(&h.manager, |s| s.qr_challenge.is_some()).await;

    // First close: immediate reconnect with a new challenge.
    h.transport
        .drop_connection(CloseReason::ConnectionLost("timeout".into()))
        .await
        .unwrap();
    let status = wait_for(&h.manager, |s| {
        s.qr_challenge.is_some() && h.transport.instance_count() == 2
    })
    .await;
    assert_eq!(status.state, ConnectionState::Connecting);

    // Second close without an open in between: waits the base delay.
    h.transport
        .drop_connection(CloseReason::ConnectionLost("timeout".into()))
        .await
        .unwrap();
    wait_state(&h.manager, ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.manager.status().state, ConnectionState::Disconnected);
    assert_eq!(h.transport.instance_count(), 2);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.transport.instance_count(), 3);
    assert_eq!(h.manager.status().state, ConnectionState::Connecting);
}

/// Drop the live connection and return how long the session took to reopen.
async fn flap(h: &Harness) -> Duration {
    let next = h.transport.instance_count() + 1;
    let started = tokio::time::Instant::now();
    h.transport
        .drop_connection(CloseReason::ConnectionLost("flap".into()))
        .await
        .unwrap();
    wait_for(&h.manager, |s| {
        s.state == ConnectionState::Open && h.transport.instance_count() == next
    })
    .await;
    started.elapsed()
}

#[tokio::test(start_paused = true)]
async fn test_flapping_connection_backs_off() {
    let h = harness();
    open_session(&h).await;

    let mut delays = Vec::new();
    for _ in 0..6 {
        delays.push(flap(&h).await);
    }
    assert!(delays[0] < Duration::from_millis(100));
    assert!(delays[1] >= Duration::from_millis(1_000));
    assert!(delays[2] >= Duration::from_millis(2_000));
    assert!(delays[3] >= Duration::from_millis(4_000));
    assert!(delays[4] >= Duration::from_millis(8_000));
    assert!(delays[5] >= Duration::from_millis(8_000));
    assert!(delays[5] < Duration::from_millis(9_000));
}

#[tokio::test(start_paused = true)]
async fn test_stable_connection_resets_backoff() {
    let h = harness();
    open_session(&h).await;
    flap(&h).await;
    assert!(flap(&h).await >= Duration::from_millis(1_000));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(flap(&h).await < Duration::from_millis(100));
    assert!(flap(&h).await >= Duration::from_millis(1_000));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let h = harness();
    h.manager.connect().await.unwrap();
    for instance in 1..=2 {
        wait_for(&h.manager, |s| {
            s.qr_challenge.is_some() && h.transport.instance_count() == instance
        })
        .await;
        h.transport
            .drop_connection(CloseReason::Other("stream error".into()))
            .await
            .unwrap();
    }
    wait_state(&h.manager, ConnectionState::Disconnected).await;

    h.manager.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.instance_count(), 2);
    assert_eq!(h.manager.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_cancels_playback() {
    let h = harness();
    open_session(&h).await;
    h.playback.start(NewJob {
        conversation_id: "4470@s.loopback.net".to_string(),
        query: "Hello".to_string(),
        target: MessageHandle {
            conversation_id: "4470@s.loopback.net".to_string(),
            message_id: "m1".to_string(),
        },
        request_id: None,
    });
    assert_eq!(h.playback.active_jobs().len(), 1);

    h.transport
        .drop_connection(CloseReason::Replaced)
        .await
        .unwrap();
    wait_for(&h.manager, |_| h.playback.active_jobs().is_empty()).await;
}

// --- disconnect ---

#[tokio::test]
async fn test_disconnect_logs_out_and_stays_down() {
    let h = harness();
    open_session(&h).await;

    h.manager.disconnect().await.unwrap();
    assert_eq!(h.manager.status(), SessionStatus::default());
    assert!(h.transport.linked_account().is_none());
    assert!(!h.transport.is_live());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.transport.instance_count(), 1);
    assert_eq!(h.ledger.users()[0].status, UserStatus::Disconnected);
}

#[tokio::test]
async fn test_disconnect_when_disconnected_is_noop() {
    let h = harness();
    h.manager.disconnect().await.unwrap();
    h.manager.disconnect().await.unwrap();
    assert_eq!(h.transport.instance_count(), 0);
}

// --- pairing ---

#[tokio::test]
async fn test_pair_returns_code_and_links() {
    let h = harness();
    let code = h.manager.pair("+1 (555) 123-4567").await.unwrap();
    assert_eq!(code.len(), 9);
    assert_eq!(&code[4..5], "-");
    assert_eq!(h.manager.status().state, ConnectionState::Connecting);

    let again = h.manager.pair("15551234567").await;
    assert!(matches!(again, Err(BotError::StateConflict(_))));

    h.transport.redeem_pairing_code(&code).await.unwrap();
    let status = wait_state(&h.manager, ConnectionState::Open).await;
    assert_eq!(status.identity.as_deref(), Some("15551234567"));

    let users = h.ledger.users();
    assert_eq!(users[0].pairing_code.as_deref(), Some(code.as_str()));
}

#[tokio::test]
async fn test_pair_replaces_qr_flow() {
    let h = harness();
    h.manager.connect().await.unwrap();
    wait_for(&h.manager, |s| s.qr_challenge.is_some()).await;

    h.manager.pair("447911123456").await.unwrap();
    assert_eq!(h.transport.instance_count(), 2);
    assert!(h.manager.status().qr_challenge.is_none());
}

#[tokio::test]
async fn test_pair_when_open_conflicts() {
    let h = harness();
    open_session(&h).await;
    let err = h.manager.pair("15551234567").await.unwrap_err();
    assert!(matches!(err, BotError::StateConflict(_)));
    assert_eq!(h.manager.status().state, ConnectionState::Open);
}

#[tokio::test]
async fn test_pair_invalid_number_touches_nothing() {
    let h = harness();
    let err = h.manager.pair("12-34").await.unwrap_err();
    assert!(matches!(err, BotError::Validation(_)));
    assert_eq!(h.transport.instance_count(), 0);
}

#[tokio::test]
async fn test_pair_failure_returns_to_disconnected() {
    let h = harness();
    h.transport.set_fail_pairing(true);
    let err = h.manager.pair("15551234567").await.unwrap_err();
    assert!(matches!(err, BotError::Transport(_)));
    assert_eq!(h.manager.status().state, ConnectionState::Disconnected);
    assert!(!h.transport.is_live());

    h.transport.set_fail_pairing(false);
    assert!(h.manager.pair("15551234567").await.is_ok());
}

// --- event routing ---

#[tokio::test]
async fn test_stale_generation_events_are_ignored() {
    let h = harness();
    h.manager.connect().await.unwrap();
    wait_for(&h.manager, |s| s.qr_challenge.is_some()).await;
    let current = h.manager.lock().generation;

    h.manager
        .events_tx
        .send((
            current - 1,
            TransportEvent::Opened {
                identity: "999999999@s.loopback.net".into(),
            },
        ))
        .await
        .unwrap();
    h.manager
        .events_tx
        .send((current, TransportEvent::QrIssued("fresh".into())))
        .await
        .unwrap();

    let status = wait_for(&h.manager, |s| s.qr_challenge.as_deref() == Some("fresh")).await;
    assert_eq!(status.state, ConnectionState::Connecting);
    assert!(status.identity.is_none());
}

#[tokio::test]
async fn test_inbound_messages_are_forwarded() {
    let mut h = harness();
    open_session(&h).await;

    let msg = InboundMessage::direct("4470@s.loopback.net", ".play Hello");
    h.transport.inject(msg.clone()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), h.inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.id, msg.id);
    assert_eq!(received.text, ".play Hello");
}
