use super::Store;
use melodia_core::config::LedgerConfig;
use melodia_core::records::{ConnectedUserUpdate, NewSongRequest, RequestStatus, UserStatus};
use melodia_core::traits::Ledger;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

/// Create an in-memory store for testing.
async fn test_store() -> Store {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .unwrap();
    Store::run_migrations(&pool).await.unwrap();
    Store { pool }
}

fn request(phone: &str, query: &str) -> NewSongRequest {
    NewSongRequest {
        phone_number: phone.to_string(),
        query: query.to_string(),
        status: RequestStatus::Playing,
        is_group: false,
        group_name: None,
    }
}

#[tokio::test]
async fn test_create_song_request_returns_record() {
    let store = test_store().await;
    let rec = store
        .create_song_request(request("15551234567", "Imagine Dragons"))
        .await
        .unwrap();
    assert!(rec.id > 0);
    assert_eq!(rec.phone_number, "15551234567");
    assert_eq!(rec.query, "Imagine Dragons");
    assert_eq!(rec.status, RequestStatus::Playing);
    assert!(!rec.is_group);
    assert!(rec.group_name.is_none());
}

#[tokio::test]
async fn test_group_request_keeps_group_name() {
    let store = test_store().await;
    let rec = store
        .create_song_request(NewSongRequest {
            is_group: true,
            group_name: Some("Road Trip".to_string()),
            ..request("120363001234567890", "Numb")
        })
        .await
        .unwrap();
    assert!(rec.is_group);
    assert_eq!(rec.group_name.as_deref(), Some("Road Trip"));
}

#[tokio::test]
async fn test_list_song_requests_newest_first_with_limit() {
    let store = test_store().await;
    for q in ["one", "two", "three"] {
        store.create_song_request(request("1", q)).await.unwrap();
    }

    let all = store.list_song_requests(50).await.unwrap();
    let queries: Vec<&str> = all.iter().map(|r| r.query.as_str()).collect();
    assert_eq!(queries, vec!["three", "two", "one"]);

    let limited = store.list_song_requests(2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].query, "three");
}

#[tokio::test]
async fn test_update_song_request_status() {
    let store = test_store().await;
    let rec = store.create_song_request(request("1", "x")).await.unwrap();
    store
        .update_song_request_status(rec.id, RequestStatus::Completed)
        .await
        .unwrap();
    let listed = store.list_song_requests(1).await.unwrap();
    assert_eq!(listed[0].status, RequestStatus::Completed);
}

#[tokio::test]
async fn test_update_missing_request_errors() {
    let store = test_store().await;
    let err = store
        .update_song_request_status(999, RequestStatus::Failed)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_upsert_user_inserts_then_updates() {
    let store = test_store().await;
    let first = store
        .upsert_connected_user(ConnectedUserUpdate {
            phone_number: "15551234567".to_string(),
            status: UserStatus::Connected,
            pairing_code: Some("ABCD-EFGH".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(first.status, UserStatus::Connected);

    let second = store
        .upsert_connected_user(ConnectedUserUpdate {
            phone_number: "15551234567".to_string(),
            status: UserStatus::Disconnected,
            pairing_code: None,
        })
        .await
        .unwrap();
    assert_eq!(second.id, first.id, "upsert must keep the same row");
    assert_eq!(second.status, UserStatus::Disconnected);
    assert_eq!(
        second.pairing_code.as_deref(),
        Some("ABCD-EFGH"),
        "missing pairing code keeps the stored one"
    );
    assert!(second.last_connected >= first.last_connected);

    assert_eq!(store.list_connected_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_users_ordered_by_last_connected() {
    let store = test_store().await;
    for phone in ["111", "222"] {
        store
            .upsert_connected_user(ConnectedUserUpdate {
                phone_number: phone.to_string(),
                status: UserStatus::Connected,
                pairing_code: None,
            })
            .await
            .unwrap();
    }
    // Reconnect the first one; it should move to the top.
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    store
        .upsert_connected_user(ConnectedUserUpdate {
            phone_number: "111".to_string(),
            status: UserStatus::Connected,
            pairing_code: None,
        })
        .await
        .unwrap();

    let users = store.list_connected_users().await.unwrap();
    assert_eq!(users[0].phone_number, "111");
    assert_eq!(users[1].phone_number, "222");
}

#[tokio::test]
async fn test_new_creates_file_and_migrations_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested/ledger.db");
    let config = LedgerConfig {
        db_path: db_path.to_string_lossy().to_string(),
        request_limit: 50,
    };
    let store = Store::new(&config).await.unwrap();
    store.create_song_request(request("1", "a")).await.unwrap();
    drop(store);

    // Reopen: migrations must not re-run or wipe data.
    let reopened = Store::new(&config).await.unwrap();
    assert!(db_path.exists());
    assert_eq!(reopened.list_song_requests(10).await.unwrap().len(), 1);
}
