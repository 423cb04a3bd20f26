use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::runtime::event::ProgressEvent;
use crate::runtime::task::ProgressCallback;
use crate::runtime::types::TaskId;

/// Outcome of one [`EventChannel::drain`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drained {
    Event(ProgressEvent),
    /// Nothing arrived within the timeout.
    TimedOut,
    /// The channel was deregistered and every buffered event consumed.
    Closed,
}

/// Consumer end of a task's mailbox.
///
/// Events arrive in the order they were pushed. The producer end lives in
/// the [`ConnectionRegistry`]; removing it there closes this channel once the
/// remaining events are drained.
#[derive(Debug)]
pub struct EventChannel {
    task_id: TaskId,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl EventChannel {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Pop the next event, waiting at most `timeout` (forever when `None`).
    pub async fn drain(&mut self, timeout: Option<Duration>) -> Drained {
        let next = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx.recv()).await {
                Ok(next) => next,
                Err(_) => return Drained::TimedOut,
            },
            None => self.rx.recv().await,
        };
        match next {
            Some(event) => Drained::Event(event),
            None => Drained::Closed,
        }
    }
}

/// Maps task ids to the producer end of their event channel.
///
/// Workers call [`Self::push`] from blocking slots; this only takes the read
/// lock, so pushes never change the map's shape. Insertion happens once per
/// task in [`Self::register`] and removal at most once in
/// [`Self::deregister`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    channels: Arc<RwLock<HashMap<TaskId, mpsc::UnboundedSender<ProgressEvent>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel for `task_id` and store its producer end.
    ///
    /// Registering an id twice replaces the old channel, which then reports
    /// [`Drained::Closed`] to its consumer.
    pub fn register(&self, task_id: TaskId) -> EventChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut map) = self.channels.write() {
            map.insert(task_id.clone(), tx);
        }
        debug!(task_id = %task_id, "event channel registered");
        EventChannel { task_id, rx }
    }

    /// Deliver `event` to the channel for `task_id`.
    ///
    /// Returns `false` without side effects when no channel is registered or
    /// its consumer is gone.
    pub fn push(&self, task_id: &TaskId, event: ProgressEvent) -> bool {
        self.channels
            .read()
            .ok()
            .and_then(|map| map.get(task_id).map(|tx| tx.send(event).is_ok()))
            .unwrap_or(false)
    }

    /// Remove the channel for `task_id`. Returns `true` only for the call
    /// that actually removed it.
    pub fn deregister(&self, task_id: &TaskId) -> bool {
        let removed = self
            .channels
            .write()
            .map(|mut map| map.remove(task_id).is_some())
            .unwrap_or(false);
        if removed {
            debug!(task_id = %task_id, "event channel deregistered");
        }
        removed
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.channels
            .read()
            .map(|map| map.contains_key(task_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.channels.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every channel, e.g. at process shutdown. Open consumers see
    /// [`Drained::Closed`] after their buffered events.
    pub fn close_all(&self) -> usize {
        let closed = self
            .channels
            .write()
            .map(|mut map| map.drain().count())
            .unwrap_or(0);
        debug!(closed, "all event channels closed");
        closed
    }

    /// A progress callback that turns raw percentages into events pushed to
    /// this registry.
    pub fn callback(&self) -> ProgressCallback {
        let registry = self.clone();
        Arc::new(move |task_id: &TaskId, percentage: i32, message: &str| {
            registry.push(task_id, ProgressEvent::from_callback(percentage, message));
        })
    }
}
