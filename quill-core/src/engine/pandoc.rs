use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use super::{ConversionEngine, EngineError, EngineInput};

/// Extra arguments passed whenever the target is PDF.
const PDF_ARGS: &[&str] = &["--pdf-engine=xelatex", "-V", "geometry:margin=1in"];

/// [`ConversionEngine`] backed by the `pandoc` command-line tool.
#[derive(Debug, Clone)]
pub struct PandocEngine {
    program: PathBuf,
}

impl PandocEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Whether the configured binary can be launched at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn build_args(
        input: EngineInput<'_>,
        input_format: Option<&str>,
        output_format: &str,
        output_path: Option<&Path>,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(from) = input_format {
            args.push("--from".into());
            args.push(reader_format(from).into());
        }
        args.push("--to".into());
        args.push(writer_format(output_format).into());
        if output_format == "pdf" {
            args.extend(PDF_ARGS.iter().map(OsString::from));
        }
        if let Some(out) = output_path {
            args.push("-o".into());
            args.push(out.as_os_str().to_owned());
        }
        if let EngineInput::Path(path) = input {
            args.push(path.as_os_str().to_owned());
        }
        args
    }
}

impl Default for PandocEngine {
    fn default() -> Self {
        Self::new("pandoc")
    }
}

impl ConversionEngine for PandocEngine {
    fn convert(
        &self,
        input: EngineInput<'_>,
        input_format: Option<&str>,
        output_format: &str,
        output_path: Option<&Path>,
    ) -> Result<String, EngineError> {
        let program = self.program_name();
        let args = Self::build_args(input, input_format, output_format, output_path);
        debug!(program = %program, ?args, "invoking pandoc");

        let spawn_err = |source| EngineError::Spawn {
            program: program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(match input {
                EngineInput::Text(_) => Stdio::piped(),
                EngineInput::Path(_) => Stdio::null(),
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        // Feed stdin from a separate thread so a large document cannot
        // deadlock against a full stdout pipe.
        let writer = match (input, child.stdin.take()) {
            (EngineInput::Text(text), Some(mut stdin)) => {
                let text = text.to_owned();
                Some(std::thread::spawn(move || stdin.write_all(text.as_bytes())))
            }
            _ => None,
        };

        let output = child.wait_with_output().map_err(spawn_err)?;

        let fed = match writer {
            Some(handle) => handle
                .join()
                .map_err(|_| EngineError::Other("pandoc stdin writer panicked".to_owned()))?,
            None => Ok(()),
        };

        // A failing pandoc usually closes stdin early; its stderr is the
        // more useful diagnostic than the resulting broken pipe.
        if !output.status.success() {
            return Err(EngineError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        fed.map_err(spawn_err)?;

        String::from_utf8(output.stdout).map_err(|_| EngineError::InvalidOutput { program })
    }
}

/// Pandoc has no `plain` reader; plain text is read as markdown.
fn reader_format(format: &str) -> &str {
    match format {
        "txt" => "markdown",
        other => other,
    }
}

fn writer_format(format: &str) -> &str {
    match format {
        "txt" => "plain",
        other => other,
    }
}
