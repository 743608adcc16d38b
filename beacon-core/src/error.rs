use thiserror::Error;

/// Errors surfaced by the persistence boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("record does not belong to the requesting recipient")]
    Forbidden,

    #[error("invalid {field}: {value}")]
    Invalid { field: &'static str, value: String },

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),
}

/// Errors surfaced by the estimator/scheduler/orchestrator layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Activity estimation requested for a recipient with zero presence
    /// samples in the retained window. Callers decide skip-vs-fail.
    #[error("no presence data for recipient")]
    NoPresenceData,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("event bus error: {0}")]
    Bus(#[from] anyhow::Error),
}
