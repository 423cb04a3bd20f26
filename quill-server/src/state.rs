//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use quill_core::{ConnectionRegistry, ConversionEngine, StreamEncoder, WorkerPool};

use crate::config::Config;

/// State shared across all HTTP handlers.
///
/// Constructed once in `main`; the pool and registry are torn down
/// explicitly after the HTTP server stops.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Bounded conversion worker pool.
    pub pool: WorkerPool,
    /// Task id → event channel map shared by all open streams.
    pub registry: ConnectionRegistry,
    /// Opens progress streams over `pool` and `registry`.
    pub encoder: StreamEncoder,
}

impl AppState {
    /// Start the worker pool for `engine` and wire up the stream encoder.
    pub fn new(config: Config, engine: Arc<dyn ConversionEngine>) -> Self {
        let pool = WorkerPool::start(engine, config.worker_count);
        let registry = ConnectionRegistry::new();
        let encoder = StreamEncoder::new(pool.clone(), registry.clone());
        Self {
            config: Arc::new(config),
            pool,
            registry,
            encoder,
        }
    }

    /// Close every open stream, then drain the pool.
    pub async fn shutdown(&self) {
        self.registry.close_all();
        self.pool.shutdown().await;
    }
}
