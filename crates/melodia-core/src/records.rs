//! Ledger record types shared by the store, the core, and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle status of a song request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Playing,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Playing => "playing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "playing" => Ok(Self::Playing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown request status '{other}'")),
        }
    }
}

/// Connection status recorded for a linked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Connected,
    Disconnected,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(format!("unknown user status '{other}'")),
        }
    }
}

/// A song request to insert.
#[derive(Debug, Clone)]
pub struct NewSongRequest {
    pub phone_number: String,
    pub query: String,
    pub status: RequestStatus,
    pub is_group: bool,
    pub group_name: Option<String>,
}

/// A persisted song request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongRequestRecord {
    pub id: i64,
    pub phone_number: String,
    pub query: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub is_group: bool,
    pub group_name: Option<String>,
}

/// Upsert payload for a connected account. A `None` pairing code keeps the stored one.
#[derive(Debug, Clone)]
pub struct ConnectedUserUpdate {
    pub phone_number: String,
    pub status: UserStatus,
    pub pairing_code: Option<String>,
}

/// A persisted connected account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedUserRecord {
    pub id: i64,
    pub phone_number: String,
    pub status: UserStatus,
    pub pairing_code: Option<String>,
    pub last_connected: DateTime<Utc>,
}
