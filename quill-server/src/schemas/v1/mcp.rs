use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

/// Query of `GET /v1/sse`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct McpQuery {
    /// Tool to invoke; omit for tool discovery.
    pub tool: Option<String>,
    pub contents: Option<String>,
    pub input_format: Option<String>,
    pub output_format: Option<String>,
    pub output_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum McpStatus {
    Created,
    Running,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct McpErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// One status-tagged event on the tool-protocol stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct McpEvent {
    pub id: String,
    pub status: McpStatus,
    pub tool: String,
    pub created_at: String,
    #[schema(value_type = Option<Object>)]
    pub output: Option<Value>,
    pub error: Option<McpErrorDetail>,
    /// Seconds since the stream opened; set on terminal events.
    pub runtime: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct McpToolParameter {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub parameters: Vec<McpToolParameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct McpToolsDiscovery {
    pub tools: Vec<McpTool>,
}
