use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Validation(#[from] offerwatch_models::ValidationError),

    #[error(transparent)]
    Remote(#[from] offerwatch_remote::RemoteError),

    #[error("Cache error: {0}")]
    Cache(#[from] offerwatch_cache::CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Manager not configured: {0}")]
    NotConfigured(String),
}

impl ManagerError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_session_expired())
    }
}
