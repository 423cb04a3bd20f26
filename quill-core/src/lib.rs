mod engine;
mod runtime;

pub use engine::pandoc::PandocEngine;
pub use engine::{ConversionEngine, EngineError, EngineInput};
pub use runtime::event::{ProgressEvent, error_code, progress};
pub use runtime::pool::WorkerPool;
pub use runtime::registry::{ConnectionRegistry, Drained, EventChannel};
pub use runtime::request::{
    ConversionMode, ConversionRequest, FILE_OUTPUT_FORMATS, SUPPORTED_FORMATS, ValidationError,
};
pub use runtime::stream::{
    HeartbeatPolicy, MIN_HEARTBEAT_INTERVAL, ProgressStream, StreamEncoder, StreamPolicy,
    StreamState,
};
pub use runtime::task::{ConversionTask, ProgressCallback};
pub use runtime::types::{ConversionError, RuntimeError, TaskId};
