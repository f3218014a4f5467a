use thiserror::Error;

/// Failure below the HTTP layer: connect, TLS, timeout, body read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not Logged In: {0}")]
    SessionExpired(String),

    #[error("{message}")]
    Rejected {
        eresult: Option<u32>,
        message: String,
    },

    #[error("{0}")]
    Protocol(String),

    #[error("Data temporarily unavailable")]
    DataUnavailable,

    #[error("Markup parse error: {0}")]
    Parse(String),

    #[error("API key or access token is not set")]
    MissingCredentials,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] offerwatch_cache::CacheError),
}

impl From<TransportError> for RemoteError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e.0)
    }
}

impl RemoteError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}
