pub mod pandoc;

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
/// All errors a conversion engine can report
pub enum EngineError {
    /// The engine process could not be started or talked to.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran but reported failure.
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} produced non UTF-8 output")]
    InvalidOutput { program: String },

    /// Engine-specific failure that has no better home.
    #[error("{0}")]
    Other(String),
}

/// Where the engine reads its source document from.
#[derive(Debug, Clone, Copy)]
pub enum EngineInput<'a> {
    Path(&'a Path),
    Text(&'a str),
}

/// A black-box document converter.
///
/// Calls are synchronous and may block for as long as the conversion takes;
/// the worker pool only ever invokes an engine from a blocking slot.
pub trait ConversionEngine: Send + Sync + 'static {
    /// Convert `input` into `output_format`.
    ///
    /// `input_format` may be `None` for file input, in which case the engine
    /// infers it. When `output_path` is set the result is written there and
    /// the returned string is whatever the engine printed (often empty).
    fn convert(
        &self,
        input: EngineInput<'_>,
        input_format: Option<&str>,
        output_format: &str,
        output_path: Option<&Path>,
    ) -> Result<String, EngineError>;
}
