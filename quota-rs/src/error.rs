use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Quota not found: {0}")]
    NotFound(String),

    #[error("Insufficient quota: available {available} MB, requested {requested} MB")]
    InsufficientCapacity { available: i64, requested: i64 },

    #[error("Hierarchy violation: {0}")]
    HierarchyViolation(String),

    #[error("Cannot release quota with active usage ({used_mb} MB) or allocations ({allocated_mb} MB)")]
    BusyResource { used_mb: i64, allocated_mb: i64 },

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("Authorization service error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QuotaError {
    /// Whether the caller may retry the same request unchanged.
    ///
    /// Storage and upstream failures are transient; everything else needs a
    /// different request or a new grant.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Upstream(_))
    }
}

impl From<reqwest::Error> for QuotaError {
    fn from(err: reqwest::Error) -> Self {
        QuotaError::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuotaError>;
