//! Infrastructure errors
//!
//! Failures of user code never show up here; they become
//! [`polyrun_common::ErrorKind`] values inside an execution result.

use polyrun_common::RequestId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to initialize {runtime} runtime: {reason}")]
    RuntimeInit { runtime: &'static str, reason: String },

    #[error("{runtime} runtime error: {reason}")]
    Runtime { runtime: &'static str, reason: String },

    #[error("Engine worker has shut down")]
    WorkerGone,

    #[error("Request {0} is already in flight")]
    DuplicateRequest(RequestId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn init(runtime: &'static str, reason: impl ToString) -> Self {
        EngineError::RuntimeInit {
            runtime,
            reason: reason.to_string(),
        }
    }

    pub fn runtime(runtime: &'static str, reason: impl ToString) -> Self {
        EngineError::Runtime {
            runtime,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
