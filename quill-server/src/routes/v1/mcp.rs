//! Tool-protocol event stream (`GET /v1/sse`).
//!
//! Without a `tool` parameter the stream carries a single discovery event.
//! `tool=convert-contents` runs a conversion under the hard-deadline policy
//! and reports status-tagged events; any other tool yields one error event.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::{StreamExt, future, stream};
use quill_core::{ConversionRequest, FILE_OUTPUT_FORMATS, ProgressEvent, SUPPORTED_FORMATS};
use serde_json::json;
use tracing::{info, warn};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::schemas::v1::mcp::{
    McpErrorDetail, McpEvent, McpQuery, McpStatus, McpTool, McpToolParameter, McpToolsDiscovery,
};
use crate::state::AppState;

pub const CONVERT_TOOL: &str = "convert-contents";

/// Input formats advertised for the tool; any supported format is accepted.
const ADVERTISED_INPUT_FORMATS: &[&str] = &["markdown", "html", "txt", "rst"];

#[derive(OpenApi)]
#[openapi(
    paths(mcp_sse),
    components(schemas(
        McpQuery,
        McpEvent,
        McpStatus,
        McpErrorDetail,
        McpTool,
        McpToolParameter,
        McpToolsDiscovery,
    ))
)]
pub struct McpApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/sse", get(mcp_sse))
}

/// Tool discovery and tool invocation over SSE.
#[utoipa::path(
    get,
    path = "/v1/sse",
    tag = "mcp",
    params(McpQuery),
    responses(
        (
            status = 200,
            description = "Tool-protocol event stream",
            content_type = "text/event-stream"
        ),
    )
)]
pub async fn mcp_sse(
    State(state): State<Arc<AppState>>,
    Query(query): Query<McpQuery>,
) -> Response {
    let tool = query.tool.clone().filter(|t| !t.is_empty());
    match tool.as_deref() {
        None => {
            let payload = json!({ "type": "discovery", "data": discovery() });
            single(Event::default().data(payload.to_string()))
        }
        Some(CONVERT_TOOL) => invoke_convert(&state, query),
        Some(other) => {
            warn!(tool = other, "unknown tool requested");
            single(error_event(
                Uuid::new_v4().to_string(),
                String::new(),
                McpErrorDetail {
                    message: format!("Unknown tool: {other}"),
                    code: Some("unknown_tool".to_owned()),
                },
                None,
            ))
        }
    }
}

fn invoke_convert(state: &AppState, query: McpQuery) -> Response {
    let request = ConversionRequest {
        contents: query.contents,
        input_path: None,
        input_format: query.input_format.unwrap_or_else(|| "markdown".to_owned()),
        output_format: query.output_format.unwrap_or_else(|| "html".to_owned()),
        output_path: query.output_file.map(Into::into),
    };

    // Rejected before any task exists.
    let request = match request.validate() {
        Ok(r) => r,
        Err(e) => {
            return single(error_event(
                Uuid::new_v4().to_string(),
                CONVERT_TOOL.to_owned(),
                McpErrorDetail {
                    message: e.to_string(),
                    code: Some("invalid_request".to_owned()),
                },
                None,
            ));
        }
    };

    let progress = state
        .encoder
        .open(request, state.config.protocol_stream_policy());
    let id = progress.task_id().to_string();
    let created_at = Utc::now().to_rfc3339();
    let started = Instant::now();
    info!(task_id = %id, "tool stream opened");

    let events = progress.into_stream().filter_map(move |event| {
        let mapped = to_mcp_event(&id, &created_at, started.elapsed(), event)
            .map(|e| Event::default().json_data(e));
        future::ready(mapped)
    });

    Sse::new(events).into_response()
}

/// Map a core event onto the tool protocol. Heartbeats have no counterpart.
pub(crate) fn to_mcp_event(
    id: &str,
    created_at: &str,
    elapsed: Duration,
    event: ProgressEvent,
) -> Option<McpEvent> {
    let base = |status, output, error, runtime| McpEvent {
        id: id.to_owned(),
        status,
        tool: CONVERT_TOOL.to_owned(),
        created_at: created_at.to_owned(),
        output,
        error,
        runtime,
    };
    let runtime = Some(elapsed.as_secs_f64());
    let code = event.synthetic_code();

    match event {
        ProgressEvent::Progress {
            percentage,
            message,
        } => {
            let status = if percentage > 0 {
                McpStatus::Running
            } else {
                McpStatus::Created
            };
            Some(base(
                status,
                Some(json!({ "percentage": percentage, "message": message })),
                None,
                None,
            ))
        }
        ProgressEvent::Complete { result, .. } => {
            Some(base(McpStatus::Complete, Some(json!(result)), None, runtime))
        }
        ProgressEvent::Error { message, error } => {
            let detail = match code {
                Some(code) => McpErrorDetail {
                    message,
                    code: Some(code.to_owned()),
                },
                // Worker failures keep their own "Error: ..." text.
                None => McpErrorDetail {
                    message: error,
                    code: None,
                },
            };
            Some(base(McpStatus::Error, None, Some(detail), runtime))
        }
        ProgressEvent::Heartbeat { .. } => None,
    }
}

fn error_event(id: String, tool: String, detail: McpErrorDetail, runtime: Option<f64>) -> Event {
    let event = McpEvent {
        id,
        status: McpStatus::Error,
        tool,
        created_at: Utc::now().to_rfc3339(),
        output: None,
        error: Some(detail),
        runtime,
    };
    Event::default().data(json!(event).to_string())
}

fn single(event: Event) -> Response {
    let once = stream::once(future::ready(Ok::<Event, Infallible>(event)));
    Sse::new(once).into_response()
}

pub(crate) fn discovery() -> McpToolsDiscovery {
    let strings = |items: &[&str]| items.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();
    McpToolsDiscovery {
        tools: vec![McpTool {
            name: CONVERT_TOOL.to_owned(),
            description: "Convert document contents between formats with pandoc".to_owned(),
            parameters: vec![
                McpToolParameter {
                    name: "contents".to_owned(),
                    description: "The content to convert".to_owned(),
                    kind: "string".to_owned(),
                    required: true,
                    default: None,
                    allowed: None,
                },
                McpToolParameter {
                    name: "input_format".to_owned(),
                    description: "Source format of the content".to_owned(),
                    kind: "string".to_owned(),
                    required: false,
                    default: Some("markdown".to_owned()),
                    allowed: Some(strings(ADVERTISED_INPUT_FORMATS)),
                },
                McpToolParameter {
                    name: "output_format".to_owned(),
                    description: "Desired output format".to_owned(),
                    kind: "string".to_owned(),
                    required: false,
                    default: Some("html".to_owned()),
                    allowed: Some(strings(SUPPORTED_FORMATS)),
                },
                McpToolParameter {
                    name: "output_file".to_owned(),
                    description: format!(
                        "Output path (required for {})",
                        FILE_OUTPUT_FORMATS.join(", ")
                    ),
                    kind: "string".to_owned(),
                    required: false,
                    default: None,
                    allowed: None,
                },
            ],
        }],
    }
}
