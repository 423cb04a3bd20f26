use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::NamedTempFile;

use crate::engine::{ConversionEngine, EngineInput};
use crate::runtime::event::progress;
use crate::runtime::request::{ConversionMode, ConversionRequest, ValidationError};
use crate::runtime::types::{ConversionError, TaskId};

/// `on_progress(task_id, percentage, message)`.
///
/// Invoked from the worker's blocking slot, never from the stream consumer.
pub type ProgressCallback = Arc<dyn Fn(&TaskId, i32, &str) + Send + Sync>;

/// The unit of work submitted to a [`WorkerPool`].
///
/// [`WorkerPool`]: crate::runtime::pool::WorkerPool
pub struct ConversionTask {
    id: TaskId,
    request: ConversionRequest,
    on_progress: ProgressCallback,
}

impl std::fmt::Debug for ConversionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionTask")
            .field("id", &self.id)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl ConversionTask {
    /// Bundle `request` with a freshly generated id.
    pub fn new<F>(request: ConversionRequest, on_progress: F) -> Self
    where
        F: Fn(&TaskId, i32, &str) + Send + Sync + 'static,
    {
        Self::with_id(TaskId::new(), request, Arc::new(on_progress))
    }

    /// Bundle `request` under a caller-chosen id, e.g. one that already has
    /// a channel registered for it.
    pub fn with_id(id: TaskId, request: ConversionRequest, on_progress: ProgressCallback) -> Self {
        Self {
            id,
            request,
            on_progress,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub(crate) fn into_parts(self) -> (TaskReporter, ConversionRequest) {
        let reporter = TaskReporter {
            id: self.id,
            callback: self.on_progress,
            finished: Arc::new(AtomicBool::new(false)),
        };
        (reporter, self.request)
    }
}

/// Callback wrapper that lets through at most one terminal percentage and
/// nothing after it.
#[derive(Clone)]
pub(crate) struct TaskReporter {
    id: TaskId,
    callback: ProgressCallback,
    finished: Arc<AtomicBool>,
}

impl TaskReporter {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn report(&self, percentage: i32, message: &str) {
        if progress::is_terminal(percentage) {
            if self.finished.swap(true, Ordering::AcqRel) {
                return;
            }
        } else if self.finished.load(Ordering::Acquire) {
            return;
        }
        (self.callback)(&self.id, percentage, message);
    }
}

/// Execution body for one task. Runs on a blocking pool slot.
///
/// Every failure is reported as `-1` before being returned, so the caller
/// only needs the result for logging.
pub(crate) fn execute(
    request: &ConversionRequest,
    reporter: &TaskReporter,
    engine: &dyn ConversionEngine,
) -> Result<String, ConversionError> {
    reporter.report(progress::STARTED, "Starting conversion process");
    reporter.report(progress::PREPARED, "Preparing document for conversion");

    match convert(request, reporter, engine) {
        Ok(result) => {
            reporter.report(progress::COMPLETE, &result);
            Ok(result)
        }
        Err(e) => {
            reporter.report(progress::FAILED, &format!("Error: {e}"));
            Err(e)
        }
    }
}

fn convert(
    request: &ConversionRequest,
    reporter: &TaskReporter,
    engine: &dyn ConversionEngine,
) -> Result<String, ConversionError> {
    let to = request.output_format.as_str();
    let from = request.input_format.as_str();

    match request.mode() {
        ConversionMode::FileToFile => {
            let input = present(request.input_path())?;
            let output = present(request.output_path())?;
            require_exists(input)?;
            ensure_parent_dir(output)?;
            reporter.report(
                progress::CONVERTING,
                &format!("Converting {} to {to}", input.display()),
            );
            engine.convert(EngineInput::Path(input), None, to, Some(output))?;
            reporter.report(progress::FINALIZING, "Finalizing conversion");
            Ok(saved_message(output))
        }
        ConversionMode::FileToString => {
            let input = present(request.input_path())?;
            require_exists(input)?;
            reporter.report(
                progress::CONVERTING,
                &format!("Converting {} to {to}", input.display()),
            );
            let result = engine.convert(EngineInput::Path(input), None, to, None)?;
            reporter.report(progress::FINALIZING, "Finalizing conversion");
            Ok(result)
        }
        ConversionMode::StringToFile => {
            let contents = present(request.contents.as_deref())?;
            let output = present(request.output_path())?;
            // Removed when `staged` drops, on every exit path.
            let staged = stage_contents(contents, from)?;
            ensure_parent_dir(output)?;
            reporter.report(progress::CONVERTING, &format!("Converting content to {to}"));
            engine.convert(EngineInput::Path(staged.path()), Some(from), to, Some(output))?;
            reporter.report(progress::FINALIZING, "Finalizing conversion");
            Ok(saved_message(output))
        }
        ConversionMode::StringToString => {
            let contents = present(request.contents.as_deref())?;
            reporter.report(progress::CONVERTING, &format!("Converting content to {to}"));
            let result = engine.convert(EngineInput::Text(contents), Some(from), to, None)?;
            reporter.report(progress::FINALIZING, "Finalizing conversion");
            Ok(result)
        }
    }
}

/// Unvalidated requests can reach a mode without its input.
fn present<T>(value: Option<T>) -> Result<T, ConversionError> {
    value.ok_or_else(|| ValidationError::MissingInput.into())
}

fn saved_message(output: &Path) -> String {
    format!(
        "Content successfully converted and saved to: {}",
        output.display()
    )
}

fn require_exists(path: &Path) -> Result<(), ConversionError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConversionError::InputNotFound {
            path: path.to_path_buf(),
        })
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), ConversionError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| {
                ConversionError::io(
                    format!("failed to create output directory {}", parent.display()),
                    e,
                )
            }),
        _ => Ok(()),
    }
}

fn stage_contents(contents: &str, input_format: &str) -> Result<NamedTempFile, ConversionError> {
    let mut staged = tempfile::Builder::new()
        .prefix("quill-")
        .suffix(&format!(".{input_format}"))
        .tempfile()
        .map_err(|e| ConversionError::io("failed to create staging file", e))?;
    staged
        .write_all(contents.as_bytes())
        .and_then(|_| staged.flush())
        .map_err(|e| ConversionError::io("failed to write staging file", e))?;
    Ok(staged)
}
