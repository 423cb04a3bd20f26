use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// Percentages passed through a task's progress callback.
///
/// `100` and `-1` are terminal; a task reports exactly one of them, last.
pub mod progress {
    pub const STARTED: i32 = 0;
    pub const PREPARED: i32 = 25;
    pub const CONVERTING: i32 = 50;
    pub const FINALIZING: i32 = 75;
    pub const COMPLETE: i32 = 100;
    pub const FAILED: i32 = -1;

    pub fn is_terminal(percentage: i32) -> bool {
        percentage == COMPLETE || percentage == FAILED
    }
}

/// `error` field of errors raised by the stream rather than by a worker.
///
/// Worker failures carry their `"Error: ..."` text instead, so these never
/// collide with them.
pub mod error_code {
    pub const TIMEOUT: &str = "timeout";
    pub const SHUTDOWN: &str = "shutdown";
    pub const UNAVAILABLE: &str = "unavailable";
}

/// One state change observed by a stream consumer.
///
/// Serializes to the bare payload fields; the variant name is carried
/// separately as the event name (see [`ProgressEvent::event_name`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(untagged)]
#[strum(serialize_all = "lowercase")]
pub enum ProgressEvent {
    Progress { percentage: i32, message: String },
    Complete { message: String, result: String },
    Error { message: String, error: String },
    Heartbeat { timestamp: String },
}

impl ProgressEvent {
    /// Map a raw `(percentage, message)` callback into an event.
    ///
    /// For `100` the message is the conversion result (or the saved-path
    /// notice); for `-1` it is the `"Error: ..."` text from the worker.
    pub fn from_callback(percentage: i32, message: &str) -> Self {
        match percentage {
            progress::COMPLETE => ProgressEvent::Complete {
                message: "Conversion complete".to_owned(),
                result: message.to_owned(),
            },
            progress::FAILED => ProgressEvent::Error {
                message: format!("Error during conversion: {message}"),
                error: message.to_owned(),
            },
            p => ProgressEvent::Progress {
                percentage: p.clamp(0, 100),
                message: message.to_owned(),
            },
        }
    }

    pub fn progress(percentage: i32, message: impl Into<String>) -> Self {
        ProgressEvent::Progress {
            percentage,
            message: message.into(),
        }
    }

    /// A liveness event stamped with the current UTC time (RFC 3339).
    pub fn heartbeat() -> Self {
        ProgressEvent::Heartbeat {
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Synthetic error emitted when the inactivity ceiling is reached.
    pub fn inactivity_timeout(ceiling: Duration) -> Self {
        ProgressEvent::Error {
            message: format!(
                "Conversion timed out after {} of inactivity",
                describe_span(ceiling)
            ),
            error: error_code::TIMEOUT.to_owned(),
        }
    }

    /// Synthetic error emitted when a hard deadline elapses.
    pub fn deadline_exceeded(deadline: Duration) -> Self {
        ProgressEvent::Error {
            message: format!("Conversion timed out after {}", describe_seconds(deadline)),
            error: error_code::TIMEOUT.to_owned(),
        }
    }

    /// Synthetic error emitted when the channel is torn down underneath an
    /// open stream, e.g. during process shutdown.
    pub fn aborted() -> Self {
        ProgressEvent::Error {
            message: "Conversion aborted: server is shutting down".to_owned(),
            error: error_code::SHUTDOWN.to_owned(),
        }
    }

    /// Synthetic error for a task the pool refused to accept.
    pub fn rejected(reason: impl std::fmt::Display) -> Self {
        ProgressEvent::Error {
            message: format!("Conversion rejected: {reason}"),
            error: error_code::UNAVAILABLE.to_owned(),
        }
    }

    /// The short code of a stream-raised error; `None` for worker failures
    /// and for every other kind of event.
    pub fn synthetic_code(&self) -> Option<&'static str> {
        let ProgressEvent::Error { error, .. } = self else {
            return None;
        };
        [error_code::TIMEOUT, error_code::SHUTDOWN, error_code::UNAVAILABLE]
            .into_iter()
            .find(|code| error == code)
    }

    /// Wire event name: `progress`, `complete`, `error` or `heartbeat`.
    pub fn event_name(&self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }

    /// JSON payload without the event name.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn describe_span(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0 => format!("{} milliseconds", d.as_millis()),
        60 => "1 minute".to_owned(),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{s} seconds"),
    }
}

fn describe_seconds(d: Duration) -> String {
    match d.as_secs() {
        0 => format!("{} milliseconds", d.as_millis()),
        s => format!("{s} seconds"),
    }
}
