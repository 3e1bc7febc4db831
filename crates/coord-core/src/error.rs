use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("not initialized: run 'coord init'")]
    NotInitialized,

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job already exists: {0}")]
    JobExists(String),

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("invalid action id '{0}': expected <job-id>@<action-number>")]
    InvalidActionId(String),

    #[error("invalid offset {offset} for dataset '{dataset}': {reason}")]
    InvalidOffset {
        dataset: String,
        offset: i64,
        reason: String,
    },

    #[error("window starting {window_start} for job {job_id} is already materialized")]
    AlreadyMaterialized {
        job_id: String,
        window_start: DateTime<Utc>,
    },

    #[error("window for job {job_id} skips unmaterialized nominal time {expected_next}")]
    WindowGap {
        job_id: String,
        expected_next: DateTime<Utc>,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("concurrent modification of {entity}: expected version {expected}, found {actual}")]
    Conflict {
        entity: String,
        expected: u64,
        actual: u64,
    },

    #[error("submission failed for {action_id}: {reason}")]
    Submission { action_id: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoordError {
    /// Whether re-invoking the whole operation later may succeed.
    ///
    /// Store failures and version conflicts leave no partial state behind, so
    /// the caller can simply retry. Everything else is a defect in the job
    /// definition or the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordError::Store(_) | CoordError::Conflict { .. })
    }

    pub(crate) fn store(e: impl std::fmt::Display) -> Self {
        CoordError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoordError>;
