use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::ConversionEngine;
use crate::runtime::event::progress;
use crate::runtime::request::ConversionRequest;
use crate::runtime::task::{self, ConversionTask, TaskReporter};
use crate::runtime::types::{RuntimeError, TaskId};

/// Message delivered to tasks that were still queued when the pool shut down.
const SHUTDOWN_MESSAGE: &str = "Error: worker pool shut down before task started";

/// Bounded pool of conversion slots.
///
/// Submitted tasks are queued in arrival order and dispatched onto the first
/// free of `capacity` slots. Each conversion body runs under
/// [`tokio::task::spawn_blocking`] while holding a slot permit, so at most
/// `capacity` bodies execute at any instant.
///
/// # Usage
///
/// ```rust,ignore
/// let pool = WorkerPool::start(Arc::new(PandocEngine::default()), 4);
/// let id = pool.submit(ConversionTask::new(request, |id, pct, msg| { ... }))?;
/// pool.shutdown().await;
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    capacity: usize,
    slots: Arc<Semaphore>,
    engine: Arc<dyn ConversionEngine>,
    /// `None` once shutdown has begun.
    queue_tx: Mutex<Option<mpsc::UnboundedSender<ConversionTask>>>,
    /// In-flight conversions keyed by task id, used only by `shutdown`.
    in_flight: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.inner.capacity)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl WorkerPool {
    /// Start a pool with `capacity` slots (clamped to at least one).
    ///
    /// Spawns the dispatch loop, so this must be called inside a tokio
    /// runtime.
    pub fn start(engine: Arc<dyn ConversionEngine>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            engine,
            queue_tx: Mutex::new(Some(queue_tx)),
            in_flight: Mutex::new(HashMap::new()),
            dispatcher: Mutex::new(None),
        });

        let loop_inner = Arc::clone(&inner);
        let dispatcher = tokio::spawn(async move {
            Self::run_loop(queue_rx, loop_inner).await;
        });
        if let Ok(mut slot) = inner.dispatcher.lock() {
            *slot = Some(dispatcher);
        }

        info!(capacity, "worker pool started");
        Self { inner }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of conversions that have been dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether [`Self::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner
            .queue_tx
            .lock()
            .map(|tx| tx.is_none())
            .unwrap_or(true)
    }

    /// Queue `task` for execution and return its id immediately.
    ///
    /// Progress is delivered only through the task's callback. Fails with
    /// [`RuntimeError::PoolClosed`] once shutdown has begun, in which case
    /// the callback is never invoked.
    pub fn submit(&self, task: ConversionTask) -> Result<TaskId, RuntimeError> {
        let id = task.id().clone();
        let guard = self
            .inner
            .queue_tx
            .lock()
            .map_err(|_| RuntimeError::PoolClosed)?;
        let tx = guard.as_ref().ok_or(RuntimeError::PoolClosed)?;
        tx.send(task).map_err(|_| RuntimeError::PoolClosed)?;
        info!(task_id = %id, "conversion task submitted");
        Ok(id)
    }

    /// Submit `request` and wait for its terminal callback.
    ///
    /// Returns the conversion result, or [`RuntimeError::TaskFailed`]
    /// carrying the worker's `"Error: ..."` message.
    pub async fn convert(&self, request: ConversionRequest) -> Result<String, RuntimeError> {
        let (done_tx, done_rx) = oneshot::channel::<Result<String, String>>();
        let done_tx = Mutex::new(Some(done_tx));

        let task = ConversionTask::new(request, move |_, percentage, message| {
            if !progress::is_terminal(percentage) {
                return;
            }
            let outcome = if percentage == progress::COMPLETE {
                Ok(message.to_owned())
            } else {
                Err(message.to_owned())
            };
            if let Some(tx) = done_tx.lock().ok().and_then(|mut slot| slot.take()) {
                let _ = tx.send(outcome);
            }
        });
        self.submit(task)?;

        match done_rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(RuntimeError::TaskFailed { message }),
            Err(_) => Err(RuntimeError::TaskFailed {
                message: "conversion task ended without a result".to_owned(),
            }),
        }
    }

    /// Stop accepting tasks, fail every task that has not started yet, and
    /// wait for running conversions to finish.
    ///
    /// Running engine calls are never interrupted. Calling this more than
    /// once is harmless.
    pub async fn shutdown(&self) {
        let sender = self.inner.queue_tx.lock().ok().and_then(|mut tx| tx.take());
        if sender.is_none() {
            return;
        }
        drop(sender);
        self.inner.slots.close();
        info!("worker pool shutting down");

        // The dispatcher drains the queue, rejecting what is left, and exits
        // once the last sender is gone.
        let dispatcher = self.inner.dispatcher.lock().ok().and_then(|mut d| d.take());
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                error!(error = %e, "worker pool dispatcher panicked");
            }
        }

        let handles: Vec<_> = self
            .inner
            .in_flight
            .lock()
            .map(|mut map| map.drain().map(|(_, h)| h).collect())
            .unwrap_or_default();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "conversion task join failed during shutdown");
            }
        }
        info!("worker pool stopped");
    }

    /// Dispatch loop: pop tasks in FIFO order and hand each to a free slot.
    async fn run_loop(mut rx: mpsc::UnboundedReceiver<ConversionTask>, inner: Arc<PoolInner>) {
        while let Some(task) = rx.recv().await {
            let (reporter, request) = task.into_parts();
            match Arc::clone(&inner.slots).acquire_owned().await {
                Ok(permit) => Self::spawn_execution(&inner, reporter, request, permit),
                Err(_) => {
                    warn!(task_id = %reporter.id(), "task dropped: pool shut down before start");
                    reporter.report(progress::FAILED, SHUTDOWN_MESSAGE);
                }
            }
        }
    }

    fn spawn_execution(
        inner: &Arc<PoolInner>,
        reporter: TaskReporter,
        request: ConversionRequest,
        permit: OwnedSemaphorePermit,
    ) {
        let id = reporter.id().clone();
        let engine = Arc::clone(&inner.engine);
        let cleanup = Arc::clone(inner);

        // Hold the map lock across spawn + insert so the task cannot remove
        // its own entry before it exists.
        let Ok(mut in_flight) = inner.in_flight.lock() else {
            reporter.report(progress::FAILED, "Error: worker pool state is unavailable");
            return;
        };

        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let worker_reporter = reporter.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                task::execute(&request, &worker_reporter, engine.as_ref())
            })
            .await;

            match outcome {
                Ok(Ok(_)) => info!(task_id = %task_id, "conversion task completed"),
                Ok(Err(e)) => warn!(task_id = %task_id, error = %e, "conversion task failed"),
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "conversion worker panicked");
                    reporter.report(progress::FAILED, "Error: conversion worker panicked");
                }
            }

            if let Ok(mut map) = cleanup.in_flight.lock() {
                map.remove(&task_id);
            }
        });
        in_flight.insert(id, handle);
    }
}
