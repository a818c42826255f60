//! Linked-account credentials persisted between runs.

use chrono::{DateTime, Utc};
use melodia_core::error::BotError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Phone number of the linked account.
    pub phone_number: String,
    pub linked_at: DateTime<Utc>,
}

/// JSON file store; `None` path keeps credentials in memory only.
#[derive(Debug, Default)]
pub(super) struct CredentialStore {
    path: Option<PathBuf>,
    cached: Option<Credentials>,
}

impl CredentialStore {
    pub(super) fn open(path: Option<PathBuf>) -> Self {
        let cached = path.as_ref().and_then(|p| {
            let raw = std::fs::read_to_string(p).ok()?;
            match serde_json::from_str::<Credentials>(&raw) {
                Ok(creds) => Some(creds),
                Err(e) => {
                    warn!("ignoring unreadable credentials at {}: {e}", p.display());
                    None
                }
            }
        });
        Self { path, cached }
    }

    pub(super) fn get(&self) -> Option<&Credentials> {
        self.cached.as_ref()
    }

    pub(super) fn save(&mut self, phone_number: &str) -> Result<(), BotError> {
        let creds = Credentials {
            phone_number: phone_number.to_string(),
            linked_at: Utc::now(),
        };
        if let Some(ref path) = self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&creds)?)?;
            info!("saved credentials for {phone_number}");
        }
        self.cached = Some(creds);
        Ok(())
    }

    pub(super) fn clear(&mut self) {
        self.cached = None;
        if let Some(ref path) = self.path {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("failed to remove credentials {}: {e}", path.display());
                }
            }
        }
    }
}
