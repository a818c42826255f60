use thiserror::Error;

/// Top-level error type for Melodia.
#[derive(Debug, Error)]
pub enum BotError {
    /// The messaging transport failed: connection drop, rejected edit,
    /// failed pairing-code request.
    #[error("transport error: {0}")]
    Transport(String),

    /// Caller input was malformed (phone number, empty command argument).
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation is not valid in the current session state.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Ledger/storage error.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BotError {
    /// Whether this error should surface to an HTTP caller as a client error.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::StateConflict(_))
    }
}
