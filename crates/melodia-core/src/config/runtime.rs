use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;

/// Session lifecycle settings -- reconnect backoff after unexpected closes.
///
/// The first reconnect after a stable session is immediate. Each further
/// close doubles the delay, starting at `reconnect_base_ms` and capped at
/// `reconnect_max_ms`. A session counts as stable once it has stayed open for
/// `stable_after_ms`; shorter opens do not reset the backoff. There is no
/// retry limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            stable_after_ms: default_stable_after_ms(),
        }
    }
}

impl SessionConfig {
    /// How long a connection must stay open before the backoff resets.
    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.stable_after_ms)
    }

    /// Delay before reconnect attempt number `failures` (0 = first close after a stable open).
    pub fn reconnect_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(failures.saturating_sub(1).min(16));
        let ms = self
            .reconnect_base_ms
            .saturating_mul(factor)
            .min(self.reconnect_max_ms);
        Duration::from_millis(ms)
    }
}

/// Simulated playback settings.
///
/// The visual tick and the simulated clock increment are independent: with the
/// defaults the progress bar moves 10 simulated seconds every 5 real seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_tick_increment_secs")]
    pub tick_increment_secs: u64,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            tick_increment_secs: default_tick_increment_secs(),
            duration_secs: default_duration_secs(),
        }
    }
}

impl PlaybackConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Chat command grammar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Aliases for the play command. All are equally valid.
    #[serde(default = "default_play_aliases")]
    pub play_aliases: Vec<String>,
    /// Aliases that trigger the pairing-help reply.
    #[serde(default = "default_pair_aliases")]
    pub pair_aliases: Vec<String>,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            play_aliases: default_play_aliases(),
            pair_aliases: default_pair_aliases(),
            case_sensitive: true,
        }
    }
}
