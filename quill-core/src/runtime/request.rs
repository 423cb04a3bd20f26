use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Formats accepted on either side of a conversion.
pub const SUPPORTED_FORMATS: &[&str] = &[
    "markdown", "html", "pdf", "docx", "rst", "latex", "epub", "txt",
];

/// Output formats that must be written to a file rather than returned inline.
pub const FILE_OUTPUT_FORMATS: &[&str] = &["pdf", "docx", "rst", "latex", "epub"];

/// Rejections raised before a task is ever created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Either 'contents' or 'input_file' must be provided")]
    MissingInput,

    #[error("unsupported {field} '{format}'; must be one of: {}", SUPPORTED_FORMATS.join(", "))]
    UnsupportedFormat { field: &'static str, format: String },

    #[error("output_file path is required for {format} format")]
    OutputPathRequired { format: String },
}

/// A single document-conversion job as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub contents: Option<String>,
    pub input_path: Option<PathBuf>,
    pub input_format: String,
    pub output_format: String,
    pub output_path: Option<PathBuf>,
}

/// Which of the four execution modes a request selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    FileToFile,
    FileToString,
    StringToFile,
    StringToString,
}

impl ConversionRequest {
    /// Convert inline `contents`, returning the rendered output as a string.
    pub fn text(
        contents: impl Into<String>,
        input_format: impl Into<String>,
        output_format: impl Into<String>,
    ) -> Self {
        Self {
            contents: Some(contents.into()),
            input_path: None,
            input_format: input_format.into(),
            output_format: output_format.into(),
            output_path: None,
        }
    }

    /// Convert the file at `input_path`.
    pub fn file(
        input_path: impl Into<PathBuf>,
        input_format: impl Into<String>,
        output_format: impl Into<String>,
    ) -> Self {
        Self {
            contents: None,
            input_path: Some(input_path.into()),
            input_format: input_format.into(),
            output_format: output_format.into(),
            output_path: None,
        }
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Normalize and check the request.
    ///
    /// Formats are lowercased and matched against [`SUPPORTED_FORMATS`];
    /// empty strings count as absent for the optional fields.
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        self.contents = self.contents.filter(|c| !c.is_empty());
        self.input_path = self.input_path.filter(|p| !p.as_os_str().is_empty());
        self.output_path = self.output_path.filter(|p| !p.as_os_str().is_empty());

        if self.contents.is_none() && self.input_path.is_none() {
            return Err(ValidationError::MissingInput);
        }

        self.input_format = normalize_format("input_format", &self.input_format)?;
        self.output_format = normalize_format("output_format", &self.output_format)?;

        if self.output_path.is_none() && requires_output_file(&self.output_format) {
            return Err(ValidationError::OutputPathRequired {
                format: self.output_format.clone(),
            });
        }

        Ok(self)
    }

    /// An input path takes precedence over inline contents.
    pub fn mode(&self) -> ConversionMode {
        match (self.input_path.is_some(), self.output_path.is_some()) {
            (true, true) => ConversionMode::FileToFile,
            (true, false) => ConversionMode::FileToString,
            (false, true) => ConversionMode::StringToFile,
            (false, false) => ConversionMode::StringToString,
        }
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.input_path.as_deref()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}

pub fn requires_output_file(format: &str) -> bool {
    FILE_OUTPUT_FORMATS.contains(&format)
}

fn normalize_format(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    let format = raw.trim().to_ascii_lowercase();
    if SUPPORTED_FORMATS.contains(&format.as_str()) {
        Ok(format)
    } else {
        Err(ValidationError::UnsupportedFormat {
            field,
            format: raw.to_owned(),
        })
    }
}
