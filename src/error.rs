//! Error taxonomy for a collection run.
//!
//! Every fatal condition is one of these variants. A handful of them are also
//! tolerated inside multi-date range iteration, where the affected date is
//! recorded as a gap instead of aborting the run (see
//! [`MetricsError::is_per_date_tolerable`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    /// Missing or invalid configuration; raised before any network call.
    #[error("configuration error: {0}")]
    Config(String),

    /// Assertion could not be minted, was expired, or the exchange was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The API answered with an explicit error message.
    #[error("API error: {message}")]
    Api { message: String },

    /// A single-day report had no download links.
    #[error("no data returned for {what}")]
    EmptyResult { what: String },

    /// A mandatory report (28-day, per-user) had no download links.
    #[error("download links not found for {what}")]
    NotFoundLinks { what: String },

    /// Payload shape is not one of the known wire formats.
    #[error("cannot normalize payload: {0}")]
    Normalization(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MetricsError {
    pub fn api(message: impl Into<String>) -> Self {
        MetricsError::Api {
            message: message.into(),
        }
    }

    /// Whether a failure while fetching one date of a range may be recorded
    /// as "no data" for that date.
    pub fn is_per_date_tolerable(&self) -> bool {
        matches!(
            self,
            MetricsError::Api { .. }
                | MetricsError::EmptyResult { .. }
                | MetricsError::NotFoundLinks { .. }
                | MetricsError::Transport(_)
        )
    }
}

pub type MetricsResult<T> = std::result::Result<T, MetricsError>;
