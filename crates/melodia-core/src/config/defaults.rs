//! Default value functions used by serde for config deserialization.

pub fn default_name() -> String {
    "Melodia".to_string()
}

pub fn default_data_dir() -> String {
    "~/.melodia".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_true() -> bool {
    true
}

pub fn default_reconnect_base_ms() -> u64 {
    1_000
}

pub fn default_reconnect_max_ms() -> u64 {
    60_000
}

pub fn default_stable_after_ms() -> u64 {
    30_000
}

pub fn default_tick_interval_ms() -> u64 {
    5_000
}

pub fn default_tick_increment_secs() -> u64 {
    10
}

pub fn default_duration_secs() -> u64 {
    180
}

pub fn default_play_aliases() -> Vec<String> {
    vec![
        ".play".to_string(),
        ".\u{0634}\u{063a}\u{0644}".to_string(),
        ".\u{062a}\u{062d}\u{0645}\u{064a}\u{0644}".to_string(),
    ]
}

pub fn default_pair_aliases() -> Vec<String> {
    vec![".pair".to_string()]
}

pub fn default_db_path() -> String {
    "~/.melodia/data/ledger.db".to_string()
}

pub fn default_request_limit() -> u32 {
    50
}

pub fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_api_port() -> u16 {
    3535
}
