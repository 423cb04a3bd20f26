use std::time::Duration;

use futures::Stream;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::runtime::event::{ProgressEvent, error_code};
use crate::runtime::pool::WorkerPool;
use crate::runtime::registry::{ConnectionRegistry, Drained, EventChannel};
use crate::runtime::request::ConversionRequest;
use crate::runtime::task::ConversionTask;
use crate::runtime::types::TaskId;

/// Shortest heartbeat interval a policy will use.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Heartbeat emission with a cumulative inactivity ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// How long a drain waits before a heartbeat is emitted.
    pub interval: Duration,
    /// Total heartbeat time after which the stream gives up.
    pub inactivity_ceiling: Duration,
}

impl HeartbeatPolicy {
    /// Effective interval, never below [`MIN_HEARTBEAT_INTERVAL`] even when
    /// the fields were set directly.
    fn step(&self) -> Duration {
        self.interval.max(MIN_HEARTBEAT_INTERVAL)
    }
}

/// Termination policy for one stream connection.
///
/// Both knobs may be combined; a policy with neither waits for the task's
/// own terminal event indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPolicy {
    pub heartbeat: Option<HeartbeatPolicy>,
    /// Wall-clock limit measured from stream start.
    pub hard_deadline: Option<Duration>,
}

impl StreamPolicy {
    /// Plain SSE surface: 15s heartbeat, 5 minute inactivity ceiling.
    pub fn plain() -> Self {
        Self::heartbeat(Duration::from_secs(15), Duration::from_secs(300))
    }

    /// Protocol-wrapped surface: 60s hard deadline, no heartbeats.
    pub fn protocol() -> Self {
        Self::deadline(Duration::from_secs(60))
    }

    /// `interval` is clamped to [`MIN_HEARTBEAT_INTERVAL`].
    pub fn heartbeat(interval: Duration, inactivity_ceiling: Duration) -> Self {
        Self {
            heartbeat: Some(HeartbeatPolicy {
                interval: interval.max(MIN_HEARTBEAT_INTERVAL),
                inactivity_ceiling,
            }),
            hard_deadline: None,
        }
    }

    pub fn deadline(limit: Duration) -> Self {
        Self {
            heartbeat: None,
            hard_deadline: Some(limit),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            heartbeat: None,
            hard_deadline: None,
        }
    }
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self::plain()
    }
}

/// Lifecycle of one stream connection. Every state but `Started` and
/// `Streaming` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Started,
    Streaming,
    Completed,
    Errored,
    TimedOut,
    Disconnected,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamState::Started | StreamState::Streaming)
    }
}

/// Opens progress streams: registers a channel, submits the task, and hands
/// back a [`ProgressStream`] that drives the per-connection loop.
#[derive(Debug, Clone)]
pub struct StreamEncoder {
    pool: WorkerPool,
    registry: ConnectionRegistry,
}

impl StreamEncoder {
    pub fn new(pool: WorkerPool, registry: ConnectionRegistry) -> Self {
        Self { pool, registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Start a conversion and return the stream of its events.
    ///
    /// The channel is registered before the task is submitted so no worker
    /// event can be pushed before anyone listens.
    pub fn open(&self, request: ConversionRequest, policy: StreamPolicy) -> ProgressStream {
        let task_id = TaskId::new();
        let channel = self.registry.register(task_id.clone());
        let task = ConversionTask::with_id(task_id.clone(), request, self.registry.callback());

        let mut pending = vec![ProgressEvent::progress(0, "Starting conversion...")];
        if let Err(e) = self.pool.submit(task) {
            warn!(task_id = %task_id, error = %e, "stream task rejected");
            pending.push(ProgressEvent::rejected(e));
        }
        pending.reverse();

        ProgressStream {
            task_id,
            state: StreamState::Started,
            policy,
            channel,
            registry: self.registry.clone(),
            started: Instant::now(),
            inactivity: Duration::ZERO,
            pending,
        }
    }
}

/// Per-connection loop over one task's events.
///
/// Yields events until exactly one terminal event has been produced, then
/// ends. Dropping it before that counts as a client disconnect: the channel
/// is deregistered and the worker's remaining events are discarded.
#[derive(Debug)]
pub struct ProgressStream {
    task_id: TaskId,
    state: StreamState,
    policy: StreamPolicy,
    channel: EventChannel,
    registry: ConnectionRegistry,
    started: Instant,
    inactivity: Duration,
    /// Synthetic events still to emit, popped from the back.
    pending: Vec<ProgressEvent>,
}

impl ProgressStream {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Time since the stream was opened.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Next event, or `None` once a terminal event has been emitted.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        if self.state.is_terminal() {
            return None;
        }
        if let Some(event) = self.pending.pop() {
            self.state = StreamState::Streaming;
            if event.is_terminal() {
                self.finish(terminal_state(&event));
            }
            return Some(event);
        }

        let deadline = self.policy.hard_deadline;
        let remaining = deadline.map(|d| d.saturating_sub(self.elapsed()));
        if remaining == Some(Duration::ZERO) {
            return self.deadline_exceeded();
        }

        let interval = self.policy.heartbeat.map(|hb| hb.step());
        let wait = match (interval, remaining) {
            (Some(i), Some(r)) => Some(i.min(r)),
            (i, r) => i.or(r),
        };

        match self.channel.drain(wait).await {
            Drained::Event(event) => {
                if event.is_terminal() {
                    self.finish(terminal_state(&event));
                }
                Some(event)
            }
            Drained::TimedOut => {
                if deadline.is_some_and(|d| self.elapsed() >= d) {
                    return self.deadline_exceeded();
                }
                let Some(hb) = self.policy.heartbeat else {
                    return self.deadline_exceeded();
                };
                self.inactivity += hb.step();
                if self.inactivity >= hb.inactivity_ceiling {
                    self.pending
                        .push(ProgressEvent::inactivity_timeout(hb.inactivity_ceiling));
                }
                Some(ProgressEvent::heartbeat())
            }
            Drained::Closed => {
                self.finish(StreamState::Errored);
                Some(ProgressEvent::aborted())
            }
        }
    }

    /// Adapt into a [`futures::Stream`]. Dropping the stream disconnects.
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold(self, |mut s| async move {
            s.next_event().await.map(|event| (event, s))
        })
    }

    fn deadline_exceeded(&mut self) -> Option<ProgressEvent> {
        let limit = self.policy.hard_deadline.unwrap_or_default();
        self.finish(StreamState::TimedOut);
        Some(ProgressEvent::deadline_exceeded(limit))
    }

    fn finish(&mut self, state: StreamState) {
        self.state = state;
        self.registry.deregister(&self.task_id);
        info!(
            task_id = %self.task_id,
            state = ?state,
            elapsed_ms = self.elapsed().as_millis(),
            "progress stream finished"
        );
    }
}

fn terminal_state(event: &ProgressEvent) -> StreamState {
    match event {
        ProgressEvent::Error { error, .. } if error == error_code::TIMEOUT => StreamState::TimedOut,
        ProgressEvent::Error { .. } => StreamState::Errored,
        _ => StreamState::Completed,
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamState::Disconnected;
            if self.registry.deregister(&self.task_id) {
                info!(task_id = %self.task_id, "stream consumer disconnected");
            }
        }
    }
}
