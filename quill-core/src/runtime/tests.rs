#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Condvar, Mutex};
    use std::time::Duration;

    use futures::StreamExt;
    use tracing_test::traced_test;

    use crate::engine::{ConversionEngine, EngineError, EngineInput};
    use crate::runtime::event::ProgressEvent;
    use crate::runtime::pool::WorkerPool;
    use crate::runtime::registry::{ConnectionRegistry, Drained};
    use crate::runtime::request::ConversionRequest;
    use crate::runtime::stream::{StreamEncoder, StreamPolicy, StreamState};
    use crate::runtime::task::ConversionTask;
    use crate::runtime::types::{RuntimeError, TaskId};

    // ── Fake engines ──────────────────────────────────────────────────────────

    /// Renders `# heading` lines as `<h1>` and passes everything else through.
    struct RenderEngine;

    fn render(source: &str) -> String {
        source
            .lines()
            .map(|line| match line.strip_prefix("# ") {
                Some(text) => format!(
                    "<h1 id=\"{}\">{text}</h1>",
                    text.to_lowercase().replace(' ', "-")
                ),
                None => line.to_owned(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    impl ConversionEngine for RenderEngine {
        fn convert(
            &self,
            input: EngineInput<'_>,
            _input_format: Option<&str>,
            _output_format: &str,
            output_path: Option<&Path>,
        ) -> Result<String, EngineError> {
            let source = match input {
                EngineInput::Text(text) => text.to_owned(),
                EngineInput::Path(path) => {
                    std::fs::read_to_string(path).map_err(|e| EngineError::Other(e.to_string()))?
                }
            };
            let rendered = render(&source);
            match output_path {
                Some(out) => {
                    std::fs::write(out, rendered).map_err(|e| EngineError::Other(e.to_string()))?;
                    Ok(String::new())
                }
                None => Ok(rendered),
            }
        }
    }

    struct FailingEngine;

    impl ConversionEngine for FailingEngine {
        fn convert(
            &self,
            _input: EngineInput<'_>,
            _input_format: Option<&str>,
            _output_format: &str,
            _output_path: Option<&Path>,
        ) -> Result<String, EngineError> {
            Err(EngineError::Other("boom".to_owned()))
        }
    }

    /// Panics on text input containing `panic`, renders everything else.
    struct PanickingEngine;

    impl ConversionEngine for PanickingEngine {
        fn convert(
            &self,
            input: EngineInput<'_>,
            input_format: Option<&str>,
            output_format: &str,
            output_path: Option<&Path>,
        ) -> Result<String, EngineError> {
            if matches!(input, EngineInput::Text(text) if text.contains("panic")) {
                panic!("engine blew up");
            }
            RenderEngine.convert(input, input_format, output_format, output_path)
        }
    }

    /// Blocks every conversion until [`Gate::open`] is called.
    #[derive(Clone, Default)]
    struct Gate {
        state: Arc<(Mutex<bool>, Condvar)>,
        entered: Arc<AtomicUsize>,
    }

    impl Gate {
        fn open(&self) {
            let (lock, cvar) = &*self.state;
            *lock.lock().expect("gate lock") = true;
            cvar.notify_all();
        }

        fn wait(&self) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let (lock, cvar) = &*self.state;
            let mut open = lock.lock().expect("gate lock");
            while !*open {
                open = cvar.wait(open).expect("gate wait");
            }
        }

        fn entered(&self) -> usize {
            self.entered.load(Ordering::SeqCst)
        }
    }

    struct GatedEngine(Gate);

    impl ConversionEngine for GatedEngine {
        fn convert(
            &self,
            input: EngineInput<'_>,
            input_format: Option<&str>,
            output_format: &str,
            output_path: Option<&Path>,
        ) -> Result<String, EngineError> {
            self.0.wait();
            RenderEngine.convert(input, input_format, output_format, output_path)
        }
    }

    /// Sleeps for a fixed time and records peak concurrency.
    #[derive(Default)]
    struct CountingEngine {
        delay: Duration,
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ConversionEngine for CountingEngine {
        fn convert(
            &self,
            input: EngineInput<'_>,
            input_format: Option<&str>,
            output_format: &str,
            output_path: Option<&Path>,
        ) -> Result<String, EngineError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            RenderEngine.convert(input, input_format, output_format, output_path)
        }
    }

    /// Records whether the staged input existed while the engine ran.
    #[derive(Default)]
    struct StagingRecorder {
        seen: Mutex<Option<(std::path::PathBuf, bool)>>,
    }

    impl ConversionEngine for StagingRecorder {
        fn convert(
            &self,
            input: EngineInput<'_>,
            input_format: Option<&str>,
            output_format: &str,
            output_path: Option<&Path>,
        ) -> Result<String, EngineError> {
            if let EngineInput::Path(path) = input {
                let seen = (path.to_path_buf(), path.exists());
                *self.seen.lock().expect("staging lock") = Some(seen);
            }
            RenderEngine.convert(input, input_format, output_format, output_path)
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    type Recorded = Arc<Mutex<Vec<(i32, String)>>>;

    fn recording_task(request: ConversionRequest) -> (ConversionTask, Recorded) {
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        let task = ConversionTask::new(request, move |_, pct, msg| {
            sink.lock().expect("record lock").push((pct, msg.to_owned()));
        });
        (task, recorded)
    }

    fn percentages(recorded: &Recorded) -> Vec<i32> {
        recorded
            .lock()
            .expect("record lock")
            .iter()
            .map(|(p, _)| *p)
            .collect()
    }

    fn is_done(recorded: &Recorded) -> bool {
        percentages(recorded)
            .last()
            .is_some_and(|p| *p == 100 || *p == -1)
    }

    async fn wait_for(what: &str, cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    async fn collect(
        encoder: &StreamEncoder,
        request: ConversionRequest,
        policy: StreamPolicy,
    ) -> Vec<ProgressEvent> {
        let stream = encoder.open(request, policy).into_stream();
        tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await
            .expect("stream should end within timeout")
    }

    fn encoder_with(engine: Arc<dyn ConversionEngine>, capacity: usize) -> StreamEncoder {
        StreamEncoder::new(WorkerPool::start(engine, capacity), ConnectionRegistry::new())
    }

    fn hi() -> ConversionRequest {
        ConversionRequest::text("# Hi", "markdown", "html")
            .validate()
            .expect("valid request")
    }

    // ── Worker pool tests ─────────────────────────────────────────────────────

    #[tokio::test]
    #[traced_test]
    async fn successful_task_reports_fixed_progress_sequence() {
        let pool = WorkerPool::start(Arc::new(RenderEngine), 4);
        let (task, recorded) = recording_task(hi());
        pool.submit(task).expect("submit should succeed");

        wait_for("task completion", || is_done(&recorded)).await;

        assert_eq!(percentages(&recorded), vec![0, 25, 50, 75, 100]);
        let events = recorded.lock().expect("record lock").clone();
        assert_eq!(events[0].1, "Starting conversion process");
        assert_eq!(events[1].1, "Preparing document for conversion");
        assert_eq!(events[2].1, "Converting content to html");
        assert_eq!(events[3].1, "Finalizing conversion");
        assert!(events[4].1.contains("<h1"), "result: {}", events[4].1);
    }

    #[tokio::test]
    #[traced_test]
    async fn engine_failure_reports_single_error() {
        let pool = WorkerPool::start(Arc::new(FailingEngine), 2);
        let (task, recorded) = recording_task(hi());
        pool.submit(task).expect("submit");

        wait_for("task failure", || is_done(&recorded)).await;

        let events = recorded.lock().expect("record lock").clone();
        assert_eq!(percentages(&recorded), vec![0, 25, 50, -1]);
        assert_eq!(events[3].1, "Error: boom");
    }

    #[tokio::test]
    async fn missing_input_file_fails_before_engine_call() {
        let engine = Arc::new(CountingEngine::default());
        let pool = WorkerPool::start(engine.clone(), 2);
        let request = ConversionRequest::file("/nonexistent/quill/in.md", "markdown", "html");
        let (task, recorded) = recording_task(request);
        pool.submit(task).expect("submit");

        wait_for("task failure", || is_done(&recorded)).await;

        let events = recorded.lock().expect("record lock").clone();
        assert_eq!(percentages(&recorded), vec![0, 25, -1]);
        assert_eq!(events[2].1, "Error: Input file not found: /nonexistent/quill/in.md");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unvalidated_request_without_input_fails_in_worker() {
        let engine = Arc::new(CountingEngine::default());
        let pool = WorkerPool::start(engine.clone(), 1);
        let mut request = ConversionRequest::text("", "markdown", "html");
        request.contents = None;
        let (task, recorded) = recording_task(request);
        pool.submit(task).expect("submit");
        wait_for("task failure", || is_done(&recorded)).await;

        let events = recorded.lock().expect("record lock").clone();
        assert_eq!(percentages(&recorded), vec![0, 25, -1]);
        assert_eq!(
            events[2].1,
            "Error: Either 'contents' or 'input_file' must be provided"
        );
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn string_to_file_stages_input_and_removes_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("nested/deeper/out.html");
        let recorder = Arc::new(StagingRecorder::default());
        let pool = WorkerPool::start(recorder.clone(), 1);

        let request =
            ConversionRequest::text("# Saved", "markdown", "html").with_output_path(&output);
        let (task, recorded) = recording_task(request);
        pool.submit(task).expect("submit");
        wait_for("task completion", || is_done(&recorded)).await;

        let events = recorded.lock().expect("record lock").clone();
        assert_eq!(
            events.last().map(|(_, m)| m.clone()),
            Some(format!("Content successfully converted and saved to: {}", output.display()))
        );
        let written = std::fs::read_to_string(&output).expect("output written");
        assert!(written.contains("<h1"));

        let (staged, existed) = recorder
            .seen
            .lock()
            .expect("staging lock")
            .clone()
            .expect("engine saw a path");
        assert!(existed, "staged input should exist during the engine call");
        assert!(!staged.exists(), "staged input should be removed afterwards");
        assert_eq!(staged.extension().and_then(|e| e.to_str()), Some("markdown"));
    }

    #[tokio::test]
    async fn staged_input_is_removed_on_engine_failure() {
        struct RecordThenFail(StagingRecorder);
        impl ConversionEngine for RecordThenFail {
            fn convert(
                &self,
                input: EngineInput<'_>,
                input_format: Option<&str>,
                output_format: &str,
                output_path: Option<&Path>,
            ) -> Result<String, EngineError> {
                let _ = self.0.convert(input, input_format, output_format, output_path);
                Err(EngineError::Other("render failed".to_owned()))
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(RecordThenFail(StagingRecorder::default()));
        let pool = WorkerPool::start(engine.clone(), 1);
        let request = ConversionRequest::text("# Oops", "markdown", "html")
            .with_output_path(dir.path().join("o.html"));
        let (task, recorded) = recording_task(request);
        pool.submit(task).expect("submit");
        wait_for("task failure", || is_done(&recorded)).await;

        assert_eq!(percentages(&recorded).last(), Some(&-1));
        let (staged, _) = engine
            .0
            .seen
            .lock()
            .expect("staging lock")
            .clone()
            .expect("engine saw a path");
        assert!(!staged.exists(), "staged input must not outlive a failed task");
    }

    #[tokio::test]
    async fn file_to_file_creates_output_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.md");
        std::fs::write(&input, "# From File").expect("write input");
        let output = dir.path().join("out/doc.html");

        let pool = WorkerPool::start(Arc::new(RenderEngine), 1);
        let request = ConversionRequest::file(&input, "markdown", "html").with_output_path(&output);
        let (task, recorded) = recording_task(request);
        pool.submit(task).expect("submit");
        wait_for("task completion", || is_done(&recorded)).await;

        let events = recorded.lock().expect("record lock").clone();
        assert_eq!(events[2].1, format!("Converting {} to html", input.display()));
        assert_eq!(percentages(&recorded).last(), Some(&100));
        assert!(std::fs::read_to_string(&output).expect("output").contains("From File"));
    }

    #[tokio::test]
    async fn file_to_string_returns_rendered_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.md");
        std::fs::write(&input, "# From Disk").expect("write input");

        let pool = WorkerPool::start(Arc::new(RenderEngine), 1);
        let (task, recorded) = recording_task(ConversionRequest::file(&input, "markdown", "html"));
        pool.submit(task).expect("submit");
        wait_for("task completion", || is_done(&recorded)).await;

        let events = recorded.lock().expect("record lock").clone();
        assert_eq!(percentages(&recorded), vec![0, 25, 50, 75, 100]);
        assert_eq!(events[2].1, format!("Converting {} to html", input.display()));
        assert_eq!(events[4].1, "<h1 id=\"from-disk\">From Disk</h1>");
    }

    #[tokio::test]
    async fn unwritable_output_directory_fails_before_engine_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").expect("write blocker");
        let output = blocker.join("out.html");

        let engine = Arc::new(CountingEngine::default());
        let pool = WorkerPool::start(engine.clone(), 1);
        let request = ConversionRequest::text("# Hi", "markdown", "html").with_output_path(&output);
        let (task, recorded) = recording_task(request);
        pool.submit(task).expect("submit");
        wait_for("task failure", || is_done(&recorded)).await;

        let events = recorded.lock().expect("record lock").clone();
        assert_eq!(percentages(&recorded), vec![0, 25, -1]);
        let expected = format!("Error: failed to create output directory {}", blocker.display());
        assert!(events[2].1.starts_with(&expected), "message: {}", events[2].1);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn queued_tasks_start_in_submission_order() {
        let engine = Arc::new(CountingEngine {
            delay: Duration::from_millis(5),
            ..Default::default()
        });
        let pool = WorkerPool::start(engine, 1);
        let finished: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        for n in 0..6 {
            let sink = Arc::clone(&finished);
            let request = ConversionRequest::text(n.to_string(), "markdown", "html");
            let task = ConversionTask::new(request, move |_, pct, msg| {
                if pct == 100 {
                    sink.lock().expect("order lock").push(msg.to_owned());
                }
            });
            pool.submit(task).expect("submit");
        }

        wait_for("all tasks", || finished.lock().expect("order lock").len() == 6).await;
        assert_eq!(
            *finished.lock().expect("order lock"),
            ["0", "1", "2", "3", "4", "5"]
        );
    }

    #[tokio::test]
    async fn worker_panic_reports_one_error_and_pool_keeps_serving() {
        let pool = WorkerPool::start(Arc::new(PanickingEngine), 1);
        let request = ConversionRequest::text("panic", "markdown", "html");
        let (task, recorded) = recording_task(request);
        pool.submit(task).expect("submit");
        wait_for("panicked task", || is_done(&recorded)).await;
        wait_for("in-flight map to drain", || pool.in_flight() == 0).await;

        let events = recorded.lock().expect("record lock").clone();
        assert_eq!(percentages(&recorded), vec![0, 25, 50, -1]);
        assert_eq!(events[3].1, "Error: conversion worker panicked");

        let html = pool.convert(hi()).await.expect("pool survives a panic");
        assert!(html.contains("<h1"));
    }

    #[tokio::test]
    async fn pool_never_exceeds_capacity() {
        let engine = Arc::new(CountingEngine {
            delay: Duration::from_millis(40),
            ..Default::default()
        });
        let pool = WorkerPool::start(engine.clone(), 2);

        let recorders: Vec<Recorded> = (0..6)
            .map(|_| {
                let (task, recorded) = recording_task(hi());
                pool.submit(task).expect("submit");
                recorded
            })
            .collect();

        wait_for("all tasks", || recorders.iter().all(is_done)).await;

        for recorded in &recorders {
            assert_eq!(percentages(recorded), vec![0, 25, 50, 75, 100]);
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 6);
        let peak = engine.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrency {peak} exceeded capacity");
        wait_for("in-flight map to drain", || pool.in_flight() == 0).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn shutdown_fails_queued_tasks_and_finishes_running_ones() {
        let gate = Gate::default();
        let pool = WorkerPool::start(Arc::new(GatedEngine(gate.clone())), 1);

        let (running, running_rec) = recording_task(hi());
        pool.submit(running).expect("submit");
        wait_for("first task to enter engine", || gate.entered() == 1).await;

        let (queued, queued_rec) = recording_task(hi());
        pool.submit(queued).expect("submit");

        let shutdown = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.shutdown().await })
        };
        wait_for("pool to close", || pool.is_closed()).await;
        assert!(matches!(
            pool.submit(recording_task(hi()).0),
            Err(RuntimeError::PoolClosed)
        ));

        gate.open();
        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("shutdown should finish")
            .expect("shutdown task");

        assert_eq!(percentages(&running_rec), vec![0, 25, 50, 75, 100]);
        let queued_events = queued_rec.lock().expect("record lock").clone();
        assert_eq!(
            queued_events,
            vec![(-1, "Error: worker pool shut down before task started".to_owned())]
        );
        assert_eq!(gate.entered(), 1, "queued task must never start");
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn convert_returns_result_or_failure() {
        let pool = WorkerPool::start(Arc::new(RenderEngine), 2);
        let html = pool.convert(hi()).await.expect("conversion");
        assert!(html.contains("<h1") && html.contains("Hi"));

        let failing = WorkerPool::start(Arc::new(FailingEngine), 1);
        let err = failing.convert(hi()).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::TaskFailed { ref message } if message == "Error: boom"
        ));
    }

    // ── Registry tests ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn push_without_registration_is_a_noop() {
        let registry = ConnectionRegistry::new();
        let id = TaskId::new();
        assert!(!registry.push(&id, ProgressEvent::progress(10, "x")));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn events_from_another_thread_arrive_in_order() {
        let registry = ConnectionRegistry::new();
        let id = TaskId::new();
        let mut channel = registry.register(id.clone());

        let producer = {
            let registry = registry.clone();
            let id = id.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    assert!(registry.push(&id, ProgressEvent::progress(i % 100, i.to_string())));
                }
            })
        };
        producer.join().expect("producer thread");

        for i in 0..200 {
            match channel.drain(Some(Duration::from_secs(1))).await {
                Drained::Event(ProgressEvent::Progress { message, .. }) => {
                    assert_eq!(message, i.to_string())
                }
                other => panic!("unexpected drain result {other:?}"),
            }
        }
        assert_eq!(
            channel.drain(Some(Duration::from_millis(10))).await,
            Drained::TimedOut
        );
    }

    #[tokio::test]
    async fn deregister_happens_at_most_once_and_closes_channel() {
        let registry = ConnectionRegistry::new();
        let id = TaskId::new();
        let mut channel = registry.register(id.clone());
        assert!(registry.push(&id, ProgressEvent::progress(25, "buffered")));

        assert!(registry.deregister(&id));
        assert!(!registry.deregister(&id));
        assert!(!registry.push(&id, ProgressEvent::progress(50, "late")));

        assert!(matches!(channel.drain(None).await, Drained::Event(_)));
        assert_eq!(channel.drain(None).await, Drained::Closed);
    }

    #[tokio::test]
    async fn registry_callback_maps_percentages() {
        let registry = ConnectionRegistry::new();
        let id = TaskId::new();
        let mut channel = registry.register(id.clone());
        let callback = registry.callback();
        callback(&id, 50, "Converting content to html");
        callback(&id, 100, "<h1>x</h1>");

        assert_eq!(
            channel.drain(None).await,
            Drained::Event(ProgressEvent::progress(50, "Converting content to html"))
        );
        assert!(matches!(
            channel.drain(None).await,
            Drained::Event(ProgressEvent::Complete { ref result, .. }) if result == "<h1>x</h1>"
        ));
    }

    // ── Stream encoder tests ──────────────────────────────────────────────────

    #[tokio::test]
    #[traced_test]
    async fn stream_emits_initial_progress_then_worker_events() {
        let encoder = encoder_with(Arc::new(RenderEngine), 4);
        let events = collect(&encoder, hi(), StreamPolicy::plain()).await;

        let names: Vec<_> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            ["progress", "progress", "progress", "progress", "progress", "complete"]
        );
        assert_eq!(events[0], ProgressEvent::progress(0, "Starting conversion..."));
        let ProgressEvent::Complete { message, result } = &events[5] else {
            panic!("expected complete, got {:?}", events[5]);
        };
        assert_eq!(message, "Conversion complete");
        assert!(result.contains("<h1") && result.contains("Hi"));
        assert!(encoder.registry().is_empty(), "terminal event must deregister");
    }

    #[tokio::test]
    async fn stream_state_tracks_terminal_event() {
        let encoder = encoder_with(Arc::new(FailingEngine), 1);
        let mut stream = encoder.open(hi(), StreamPolicy::plain());
        assert_eq!(stream.state(), StreamState::Started);

        let mut last = None;
        while let Some(event) = stream.next_event().await {
            last = Some(event);
        }
        assert_eq!(stream.state(), StreamState::Errored);
        assert!(matches!(
            last,
            Some(ProgressEvent::Error { ref error, .. }) if error == "Error: boom"
        ));
        assert!(stream.next_event().await.is_none(), "nothing follows a terminal event");
    }

    #[tokio::test]
    async fn slow_task_receives_heartbeats_before_completion() {
        let engine = Arc::new(CountingEngine {
            delay: Duration::from_millis(250),
            ..Default::default()
        });
        let encoder = encoder_with(engine, 1);
        let policy = StreamPolicy::heartbeat(Duration::from_millis(40), Duration::from_secs(10));
        let events = collect(&encoder, hi(), policy).await;

        let first_heartbeat = events
            .iter()
            .position(|e| matches!(e, ProgressEvent::Heartbeat { .. }))
            .expect("at least one heartbeat");
        let complete = events
            .iter()
            .position(|e| matches!(e, ProgressEvent::Complete { .. }))
            .expect("complete event");
        assert!(first_heartbeat < complete);
        assert_eq!(complete, events.len() - 1, "complete must be last");
    }

    #[tokio::test]
    async fn inactivity_ceiling_synthesizes_timeout_error() {
        let gate = Gate::default();
        let encoder = encoder_with(Arc::new(GatedEngine(gate.clone())), 1);
        let policy = StreamPolicy::heartbeat(Duration::from_millis(20), Duration::from_millis(60));
        let mut stream = encoder.open(hi(), policy);
        let task_id = stream.task_id().clone();

        let mut events = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), stream.next_event())
            .await
            .expect("stream step")
        {
            events.push(event);
        }

        let heartbeats = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Heartbeat { .. }))
            .count();
        assert_eq!(heartbeats, 3);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Error { error, .. }) if error == "timeout"
        ));
        assert_eq!(stream.state(), StreamState::TimedOut);
        assert!(!encoder.registry().contains(&task_id));

        // The worker keeps running; its late events go nowhere.
        gate.open();
        wait_for("worker to finish", || encoder.pool().in_flight() == 0).await;
    }

    #[tokio::test]
    async fn zero_heartbeat_interval_still_reaches_ceiling() {
        let policy = StreamPolicy::heartbeat(Duration::ZERO, Duration::from_millis(20));
        assert_eq!(
            policy.heartbeat.map(|hb| hb.interval),
            Some(crate::runtime::stream::MIN_HEARTBEAT_INTERVAL)
        );

        let gate = Gate::default();
        let encoder = encoder_with(Arc::new(GatedEngine(gate.clone())), 1);
        let mut stream = encoder.open(hi(), policy);
        let mut last = None;
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), stream.next_event())
            .await
            .expect("stream step")
        {
            last = Some(event);
        }
        gate.open();

        assert_eq!(stream.state(), StreamState::TimedOut);
        assert!(matches!(
            last,
            Some(ProgressEvent::Error { ref error, .. }) if error == "timeout"
        ));
    }

    #[tokio::test]
    async fn hard_deadline_times_out_without_heartbeats() {
        let gate = Gate::default();
        let encoder = encoder_with(Arc::new(GatedEngine(gate.clone())), 1);
        let policy = StreamPolicy::deadline(Duration::from_millis(80));
        let events = collect(&encoder, hi(), policy).await;
        gate.open();

        assert!(
            events.iter().all(|e| !matches!(e, ProgressEvent::Heartbeat { .. })),
            "deadline policy must not emit heartbeats"
        );
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Error {
                message: "Conversion timed out after 80 milliseconds".to_owned(),
                error: "timeout".to_owned(),
            })
        );
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn dropping_stream_deregisters_channel() {
        let gate = Gate::default();
        let encoder = encoder_with(Arc::new(GatedEngine(gate.clone())), 1);
        let mut stream = encoder.open(hi(), StreamPolicy::plain());
        let task_id = stream.task_id().clone();

        assert_eq!(
            stream.next_event().await,
            Some(ProgressEvent::progress(0, "Starting conversion..."))
        );
        assert!(encoder.registry().contains(&task_id));
        drop(stream);

        assert!(!encoder.registry().contains(&task_id));
        assert!(!encoder.registry().push(&task_id, ProgressEvent::progress(50, "late")));
        assert!(logs_contain("stream consumer disconnected"));

        gate.open();
        wait_for("orphaned worker to finish", || encoder.pool().in_flight() == 0).await;
    }

    #[tokio::test]
    async fn concurrent_streams_do_not_leak_events() {
        let encoder = encoder_with(Arc::new(RenderEngine), 4);
        let runs = (1..=3).map(|n| {
            let encoder = encoder.clone();
            async move {
                let request = ConversionRequest::text(format!("# Hi {n}"), "markdown", "html");
                (n, collect(&encoder, request, StreamPolicy::plain()).await)
            }
        });
        let results = futures::future::join_all(runs).await;

        for (n, events) in results {
            let completes: Vec<_> = events
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::Complete { result, .. } => Some(result.clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(completes.len(), 1, "stream {n} should complete once");
            assert!(completes[0].contains(&format!("Hi {n}")));
            for other in (1..=3).filter(|m| *m != n) {
                assert!(!completes[0].contains(&format!("Hi {other}")));
            }
            let progress: Vec<i32> = events
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::Progress { percentage, .. } => Some(*percentage),
                    _ => None,
                })
                .collect();
            assert_eq!(progress, vec![0, 0, 25, 50, 75]);
        }
    }

    #[tokio::test]
    async fn closed_pool_rejects_stream_with_single_error() {
        let encoder = encoder_with(Arc::new(RenderEngine), 1);
        encoder.pool().shutdown().await;

        let events = collect(&encoder, hi(), StreamPolicy::plain()).await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ProgressEvent::Error {
                message: "Conversion rejected: worker pool is shut down".to_owned(),
                error: "unavailable".to_owned(),
            }
        );
        assert!(encoder.registry().is_empty());
    }

    #[tokio::test]
    async fn closing_registry_aborts_open_streams() {
        let gate = Gate::default();
        let encoder = encoder_with(Arc::new(GatedEngine(gate.clone())), 1);
        let mut stream = encoder.open(hi(), StreamPolicy::unbounded());
        assert!(stream.next_event().await.is_some());
        wait_for("task to start", || gate.entered() == 1).await;

        encoder.registry().close_all();
        let mut last = None;
        while let Some(event) = stream.next_event().await {
            last = Some(event);
        }
        assert_eq!(last, Some(ProgressEvent::aborted()));
        assert_eq!(stream.state(), StreamState::Errored);
        gate.open();
    }
}
