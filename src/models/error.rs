//! Defines basic error and result types used throughout the runtime.

use actix_web::http::StatusCode;
use actix_web::ResponseError;
use thiserror::Error;

use super::Duration;

/// Result type used throughout the runtime.
pub type HorizonResult<T> = Result<T, HorizonError>;

/// Error type used throughout the runtime.
#[derive(Debug, Error, PartialEq)]
pub enum HorizonError {
    /// Error occurred during interaction with Redis.
    #[error("{0}")]
    Redis(#[from] redis::RedisError),

    /// A queue had no job available. Used as a signal value between the
    /// queue and the worker loop, never surfaced to users.
    #[error("queue is empty")]
    QueueEmpty,

    /// Job type has no registered factory.
    #[error("job type '{0}' is not registered")]
    NotRegistered(String),

    /// Operation attempted on a failed job that does not exist.
    #[error("failed job '{0}' does not exist")]
    NoSuchFailedJob(String),

    /// Operation attempted on a supervisor that does not exist.
    #[error("supervisor '{0}' does not exist")]
    NoSuchSupervisor(String),

    /// Could not complete request with given parameters.
    #[error("{0}")]
    BadRequest(String),

    /// Request was not valid due to current state of some component, e.g.
    /// starting a coordinator that is already running.
    #[error("{0}")]
    Conflict(String),

    /// Component cannot be built from the given configuration.
    #[error("invalid configuration: {0}")]
    NotConfigured(String),

    /// A job ran past its per-run deadline.
    #[error("job execution timed out after {0}")]
    Timeout(Duration),

    /// Parsing of some data structure failed. Typically used when decoding
    /// JSON payloads.
    #[error("parse error: {0}")]
    Parse(String),
}

impl HorizonError {
    /// Construct a new HorizonError::Conflict with given message.
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        HorizonError::Conflict(msg.into())
    }

    /// Construct a new HorizonError::BadRequest with given message.
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        HorizonError::BadRequest(msg.into())
    }
}

impl From<serde_json::Error> for HorizonError {
    fn from(err: serde_json::Error) -> Self {
        HorizonError::Parse(err.to_string())
    }
}

impl ResponseError for HorizonError {
    fn status_code(&self) -> StatusCode {
        match self {
            HorizonError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            HorizonError::QueueEmpty => StatusCode::NOT_FOUND,
            HorizonError::NotRegistered(_)
            | HorizonError::NoSuchFailedJob(_)
            | HorizonError::NoSuchSupervisor(_) => StatusCode::NOT_FOUND,
            HorizonError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HorizonError::Conflict(_) => StatusCode::CONFLICT,
            HorizonError::NotConfigured(_)
            | HorizonError::Timeout(_)
            | HorizonError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
