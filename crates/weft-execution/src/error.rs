use std::sync::PoisonError;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use weft_common::error::CommonError;

use crate::id::TaskId;

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: TaskId, message: String },
    #[error("resource starvation: {0}")]
    ResourceStarvation(String),
    #[error("error in config: {0}")]
    CommonError(#[from] CommonError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ExecutionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ExecutionError::InvalidArgument(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ExecutionError::ConfigurationError(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ExecutionError::InternalError(message.into())
    }
}

impl From<JoinError> for ExecutionError {
    fn from(error: JoinError) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl<T> From<PoisonError<T>> for ExecutionError {
    fn from(error: PoisonError<T>) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl<T> From<mpsc::error::SendError<T>> for ExecutionError {
    fn from(error: mpsc::error::SendError<T>) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}
