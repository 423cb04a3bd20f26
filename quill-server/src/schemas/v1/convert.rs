use std::path::PathBuf;

use quill_core::ConversionRequest;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

fn default_format() -> String {
    "markdown".to_owned()
}

/// Body of `POST /v1/convert` and query of `GET /v1/convert/stream`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConvertRequest {
    /// Inline document source.
    pub contents: Option<String>,
    /// Path to an input file on the server; takes precedence over `contents`.
    pub input_file: Option<String>,
    /// Source format (default `"markdown"`).
    #[serde(default = "default_format")]
    pub input_format: String,
    /// Target format (default `"markdown"`).
    #[serde(default = "default_format")]
    pub output_format: String,
    /// Where to write the result; required for pdf, docx, rst, latex, epub.
    pub output_file: Option<String>,
}

impl From<ConvertRequest> for ConversionRequest {
    fn from(req: ConvertRequest) -> Self {
        ConversionRequest {
            contents: req.contents,
            input_path: req.input_file.map(PathBuf::from),
            input_format: req.input_format,
            output_format: req.output_format,
            output_path: req.output_file.map(PathBuf::from),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConvertResponse {
    /// Always `"success"`.
    pub status: String,
    /// Rendered document, or the saved-path notice for file output.
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConvertFailure {
    /// Always `"error"`.
    pub status: String,
    pub message: String,
}
