use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::EngineError;
use crate::runtime::request::ValidationError;

/// Opaque identifier for one submitted conversion.
///
/// Backed by a random v4 UUID, so ids are unique per submission without any
/// coordination between callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Failures raised inside a task's execution body.
///
/// Each of these is caught at the task boundary and reported through the
/// progress callback as `-1` with an `"Error: ..."` message.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The request named an input path that does not exist.
    #[error("Input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    /// The external conversion engine rejected or failed the job.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The request skipped validation and names no input at all.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Output directory creation or temp-file staging failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConversionError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ConversionError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Errors produced by the runtime layer.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The pool has been shut down and accepts no new submissions.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// A task awaited through [`WorkerPool::convert`] reported failure.
    ///
    /// [`WorkerPool::convert`]: crate::runtime::pool::WorkerPool::convert
    #[error("{message}")]
    TaskFailed { message: String },
}
