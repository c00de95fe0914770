//! Worker: one OS thread, one accelerator, one detector, many streams.
//!
//! Lifecycle: `Initializing → Running → Draining → Terminated`, or `Failed`
//! when the model cannot be loaded or the thread panics. Each cycle of the
//! running loop takes the commands queued at its start, then polls every
//! session once; a session's reads and connection attempts are individually
//! time-bounded, so a dead source only costs its own timeout.

use crate::metrics::WorkerMetrics;
use bridge::{CommandReceiver, ResultSink};
use capture::{SessionOutcome, SessionPolicy, SourceConnector, StreamSession, StreamState};
use crossbeam_channel::Sender;
use inference::{Accelerator, Detector, DetectorLoader, ModelLoadError, PostFilter};
use schema::{Command, DetectionEvent, StreamId};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Running,
    Draining,
    Terminated,
    Failed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Initializing => "initializing",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
            WorkerState::Failed => "failed",
        }
    }

    /// The worker will not process any further commands.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkerState::Draining | WorkerState::Terminated | WorkerState::Failed
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Initializing,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            3 => WorkerState::Terminated,
            _ => WorkerState::Failed,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            WorkerState::Initializing => 0,
            WorkerState::Running => 1,
            WorkerState::Draining => 2,
            WorkerState::Terminated => 3,
            WorkerState::Failed => 4,
        }
    }
}

/// Lifecycle state of one worker, written by the worker thread and read by
/// the supervisor.
#[derive(Debug, Clone)]
pub struct WorkerStatus(Arc<AtomicU8>);

impl Default for WorkerStatus {
    fn default() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Initializing.to_u8())))
    }
}

impl WorkerStatus {
    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: WorkerState) {
        self.0.store(state.to_u8(), Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub policy: SessionPolicy,
    pub filter: PostFilter,
    pub idle_poll: Duration,
}

/// Sent once per worker when initialization ends.
#[derive(Debug)]
pub(crate) enum WorkerReport {
    Ready { worker_id: usize },
    LoadFailed { worker_id: usize, error: ModelLoadError },
}

/// Sent once per worker when its thread ends, panics included.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerExit {
    pub worker_id: usize,
    pub state: WorkerState,
}

/// Reports the exit of the thread that owns it, even while unwinding.
pub(crate) struct ExitGuard {
    pub worker_id: usize,
    pub status: WorkerStatus,
    pub exits: Sender<WorkerExit>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.status.set(WorkerState::Failed);
            tracing::error!(worker_id = self.worker_id, "Worker panicked");
        }
        let _ = self.exits.send(WorkerExit {
            worker_id: self.worker_id,
            state: self.status.get(),
        });
    }
}

pub struct Worker<D: Detector> {
    worker_id: usize,
    accelerator: Accelerator,
    detector: Option<D>,
    sessions: BTreeMap<StreamId, StreamSession>,
    commands: CommandReceiver,
    results: ResultSink,
    connector: Arc<dyn SourceConnector>,
    settings: WorkerSettings,
    status: WorkerStatus,
    metrics: WorkerMetrics,
    draining: bool,
}

impl<D: Detector> Worker<D> {
    /// Load the detector for `accelerator` and move to `Running`. On failure
    /// the status becomes `Failed` and the worker never runs.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize<L>(
        worker_id: usize,
        accelerator: Accelerator,
        loader: &L,
        commands: CommandReceiver,
        results: ResultSink,
        connector: Arc<dyn SourceConnector>,
        settings: WorkerSettings,
        status: WorkerStatus,
    ) -> Result<Self, ModelLoadError>
    where
        L: DetectorLoader<Detector = D> + ?Sized,
    {
        status.set(WorkerState::Initializing);
        let started = Instant::now();

        let detector = match loader.load(accelerator) {
            Ok(detector) => detector,
            Err(e) => {
                status.set(WorkerState::Failed);
                tracing::error!(error = %e, "Model load failed");
                return Err(e);
            }
        };

        tracing::info!(
            load_ms = started.elapsed().as_millis() as u64,
            "Detection model loaded"
        );
        status.set(WorkerState::Running);

        Ok(Self {
            worker_id,
            accelerator,
            detector: Some(detector),
            sessions: BTreeMap::new(),
            commands,
            results,
            connector,
            settings,
            status,
            metrics: WorkerMetrics::init(worker_id, accelerator.to_string()),
            draining: false,
        })
    }

    pub fn state(&self) -> WorkerState {
        self.status.get()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_state(&self, stream_id: &StreamId) -> Option<StreamState> {
        self.sessions.get(stream_id).map(StreamSession::state)
    }

    /// Run until shutdown is requested, then drain.
    pub fn run(mut self) {
        tracing::info!("Worker running");

        while !self.draining {
            if !self.run_cycle() && !self.draining {
                self.idle();
            }
        }

        self.drain();
    }

    /// One pass of the running loop. Returns whether anything happened, i.e.
    /// whether the worker must not idle before the next pass.
    pub fn run_cycle(&mut self) -> bool {
        let handled = self.process_commands();
        if self.draining {
            return true;
        }
        let polled = self.poll_sessions();
        handled > 0 || polled
    }

    /// Handle the commands queued when the pass began. Later arrivals wait for
    /// the next pass so that a steady command flood cannot starve the streams.
    fn process_commands(&mut self) -> usize {
        if self.commands.shutdown_requested() {
            self.begin_draining();
            return 0;
        }

        let queued = self.commands.len();
        let mut handled = 0;
        while handled < queued && !self.draining {
            let Some(command) = self.commands.try_recv() else {
                break;
            };
            self.handle_command(command);
            handled += 1;
        }

        if self.commands.shutdown_requested() {
            self.begin_draining();
        }
        handled
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                stream_id,
                source_uri,
            } => self.start_stream(stream_id, source_uri),
            Command::Stop { stream_id } => match self.sessions.remove(&stream_id) {
                Some(session) => self.close_session(session),
                None => tracing::debug!(%stream_id, "STOP for unknown stream ignored"),
            },
            Command::Shutdown => self.begin_draining(),
        }
    }

    fn start_stream(&mut self, stream_id: StreamId, source_uri: String) {
        if self.draining {
            tracing::warn!(%stream_id, "Ignoring START while draining");
            return;
        }
        if let Some(existing) = self.sessions.get(&stream_id) {
            tracing::info!(
                %stream_id,
                source_uri = existing.source_uri(),
                requested_uri = %source_uri,
                "Stream already running, ignoring duplicate START"
            );
            return;
        }

        tracing::info!(%stream_id, %source_uri, "Starting stream");
        let session = StreamSession::new(stream_id.clone(), source_uri, Instant::now());
        self.sessions.insert(stream_id, session);
    }

    fn close_session(&mut self, mut session: StreamSession) {
        session.close();
        tracing::info!(stream_id = %session.stream_id(), "Stream closed");
        self.results
            .publish(DetectionEvent::stream_closed(session.stream_id().clone()));
    }

    fn begin_draining(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        self.status.set(WorkerState::Draining);
        tracing::info!(streams = self.sessions.len(), "Shutdown requested, draining");
    }

    /// Poll every session once. Returns whether any of them touched I/O.
    fn poll_sessions(&mut self) -> bool {
        let mut did_work = false;
        let now = Instant::now();

        for session in self.sessions.values_mut() {
            let outcome = session.poll(self.connector.as_ref(), &self.settings.policy, now);
            did_work |= outcome.did_work();
            let stream_id = session.stream_id();

            match outcome {
                SessionOutcome::Frame(frame) => {
                    let Some(detector) = self.detector.as_mut() else {
                        continue;
                    };
                    let started = Instant::now();
                    match detector.infer(&frame) {
                        Ok(raw) => {
                            let detections =
                                self.settings.filter.apply(raw, frame.width, frame.height);
                            self.metrics
                                .frame(detections.len(), started.elapsed().as_secs_f64());
                            tracing::trace!(
                                %stream_id,
                                sequence = frame.sequence,
                                detections = detections.len(),
                                "Frame processed"
                            );
                            self.results
                                .publish(DetectionEvent::detections(stream_id.clone(), detections));
                        }
                        Err(e) => {
                            self.metrics.inference_error();
                            tracing::warn!(%stream_id, error = %e, "Inference failed, skipping frame");
                        }
                    }
                }
                SessionOutcome::Connected => {
                    tracing::info!(%stream_id, "Stream connected");
                }
                SessionOutcome::ConnectFailed { attempt, error } => {
                    self.metrics.reconnect_failure();
                    let retry_in = session
                        .next_attempt_at()
                        .map(|at| at.saturating_duration_since(Instant::now()))
                        .unwrap_or_default();
                    tracing::warn!(
                        %stream_id,
                        attempt,
                        retry_in_ms = retry_in.as_millis() as u64,
                        error = %error,
                        "Connection attempt failed"
                    );
                    self.results.publish(DetectionEvent::error(
                        stream_id.clone(),
                        format!("connect attempt {attempt} failed: {error}"),
                    ));
                }
                SessionOutcome::WentStale { reason } => {
                    tracing::warn!(%stream_id, %reason, "Stream went stale");
                    self.results.publish(DetectionEvent::error(
                        stream_id.clone(),
                        format!("stream stale: {reason}"),
                    ));
                }
                SessionOutcome::Missed => {
                    tracing::trace!(%stream_id, "Frame read timed out");
                }
                SessionOutcome::Waiting | SessionOutcome::Closed => {}
            }
        }

        did_work
    }

    /// Block on the command queue until a command arrives, the next
    /// reconnection is due, or `idle_poll` elapses.
    fn idle(&mut self) {
        let now = Instant::now();
        let wait = self
            .sessions
            .values()
            .filter_map(StreamSession::next_attempt_at)
            .map(|at| at.saturating_duration_since(now))
            .min()
            .map_or(self.settings.idle_poll, |due| {
                due.min(self.settings.idle_poll)
            });

        if let Some(command) = self.commands.recv_timeout(wait) {
            self.handle_command(command);
        }
    }

    /// Close every session, release the detector, and mark the worker
    /// terminated.
    fn drain(&mut self) {
        let _span = common::span!("worker_drain");
        self.begin_draining();

        let ignored = (0..self.commands.len())
            .map_while(|_| self.commands.try_recv())
            .filter(|c| matches!(c, Command::Start { .. }))
            .count();
        if ignored > 0 {
            tracing::warn!(ignored, "Ignoring queued START commands while draining");
        }

        let sessions = std::mem::take(&mut self.sessions);
        for session in sessions.into_values() {
            self.close_session(session);
        }

        if self.detector.take().is_some() {
            tracing::info!("Detection model released");
        }

        self.status.set(WorkerState::Terminated);
        tracing::info!(
            worker_id = self.worker_id,
            accelerator = %self.accelerator,
            "Worker terminated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge::{CommandSender, ResultStream, command_channel, result_channel};
    use capture::{Backoff, Frame, FrameStream, ReadError, SourceError};
    use inference::InferenceError;
    use schema::{Detection, EventKind};
    use std::sync::{Mutex, atomic::AtomicUsize};

    /// `stub://ok` streams frames forever, `stub://dead` times out forever,
    /// `stub://flaky` ends its first connection with EOF and streams frames on
    /// every later one, anything else refuses to connect.
    #[derive(Default)]
    struct FakeConnector {
        flaky_opens: AtomicUsize,
    }

    struct FakeStream {
        alive: bool,
        eof_first: bool,
        sequence: u64,
    }

    impl FakeStream {
        fn new(alive: bool) -> Box<Self> {
            Box::new(Self {
                alive,
                eof_first: false,
                sequence: 0,
            })
        }
    }

    impl SourceConnector for FakeConnector {
        fn open(&self, uri: &str) -> Result<Box<dyn FrameStream>, SourceError> {
            match uri {
                "stub://ok" => Ok(FakeStream::new(true)),
                "stub://dead" => Ok(FakeStream::new(false)),
                "stub://flaky" => {
                    let mut stream = FakeStream::new(true);
                    stream.eof_first = self.flaky_opens.fetch_add(1, Ordering::SeqCst) == 0;
                    Ok(stream)
                }
                _ => Err(SourceError::Connect {
                    uri: uri.to_string(),
                    reason: "refused".to_string(),
                }),
            }
        }
    }

    impl FrameStream for FakeStream {
        fn read_frame(&mut self, timeout: Duration) -> Result<Frame, ReadError> {
            if self.eof_first {
                self.eof_first = false;
                return Err(ReadError::Eof);
            }
            if !self.alive {
                thread::sleep(timeout);
                return Err(ReadError::Timeout);
            }
            self.sequence += 1;
            Ok(Frame::blank(100, 100, self.sequence))
        }
    }

    /// Returns one detection per frame, failing on every frame whose sequence
    /// number is listed in `fail_on`.
    struct ScriptedDetector {
        fail_on: Vec<u64>,
        released: Arc<Mutex<bool>>,
    }

    impl Detector for ScriptedDetector {
        fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
            if self.fail_on.contains(&frame.sequence) {
                return Err(InferenceError::Failed("scripted".to_string()));
            }
            Ok(vec![
                Detection {
                    bbox: [10.0, 10.0, 500.0, 50.0],
                    class_id: 2,
                    confidence: 0.9,
                },
                Detection {
                    bbox: [0.0, 0.0, 1.0, 1.0],
                    class_id: 7,
                    confidence: 0.1,
                },
            ])
        }
    }

    impl Drop for ScriptedDetector {
        fn drop(&mut self) {
            if let Ok(mut released) = self.released.lock() {
                *released = true;
            }
        }
    }

    struct Harness {
        worker: Worker<ScriptedDetector>,
        commands: CommandSender,
        results: ResultStream,
        released: Arc<Mutex<bool>>,
    }

    fn harness(fail_on: Vec<u64>) -> Harness {
        harness_with_backoff(
            fail_on,
            Backoff::new(Duration::from_secs(60), Duration::from_secs(60)),
        )
    }

    fn harness_with_backoff(fail_on: Vec<u64>, backoff: Backoff) -> Harness {
        let (commands, rx) = command_channel(16);
        let (sink, results) = result_channel(64);
        let released = Arc::new(Mutex::new(false));
        let released_by_loader = Arc::clone(&released);
        let loader = move |_: Accelerator| -> Result<ScriptedDetector, ModelLoadError> {
            Ok(ScriptedDetector {
                fail_on: fail_on.clone(),
                released: Arc::clone(&released_by_loader),
            })
        };
        let settings = WorkerSettings {
            policy: SessionPolicy {
                frame_timeout: Duration::from_millis(5),
                stale_threshold: Duration::from_secs(60),
                backoff,
            },
            filter: PostFilter::default(),
            idle_poll: Duration::from_millis(1),
        };
        let worker = Worker::initialize(
            0,
            Accelerator::Cpu,
            &loader,
            rx,
            sink,
            Arc::new(FakeConnector::default()),
            settings,
            WorkerStatus::default(),
        )
        .unwrap();
        Harness {
            worker,
            commands,
            results,
            released,
        }
    }

    fn send(h: &Harness, command: Command) {
        h.commands.send(command, Duration::ZERO).unwrap();
    }

    fn start(id: &str, uri: &str) -> Command {
        Command::start(id, uri).unwrap()
    }

    fn id(s: &str) -> StreamId {
        StreamId::new(s).unwrap()
    }

    // ========== Status Tests ==========

    #[test]
    fn status_cell_round_trips_every_state() {
        let status = WorkerStatus::default();
        assert_eq!(status.get(), WorkerState::Initializing);
        for state in [
            WorkerState::Running,
            WorkerState::Draining,
            WorkerState::Terminated,
            WorkerState::Failed,
        ] {
            status.set(state);
            assert_eq!(status.get(), state);
        }
    }

    #[test]
    fn failed_load_marks_worker_failed() {
        let (_tx, rx) = command_channel(1);
        let (sink, _results) = result_channel(1);
        let status = WorkerStatus::default();
        let loader = |accelerator: Accelerator| -> Result<ScriptedDetector, ModelLoadError> {
            Err(ModelLoadError::Unavailable {
                accelerator,
                reason: "no device".to_string(),
            })
        };
        let result = Worker::initialize(
            3,
            Accelerator::Gpu(7),
            &loader,
            rx,
            sink,
            Arc::new(FakeConnector::default()),
            WorkerSettings {
                policy: SessionPolicy::default(),
                filter: PostFilter::default(),
                idle_poll: Duration::from_millis(1),
            },
            status.clone(),
        );

        assert!(result.is_err());
        assert_eq!(status.get(), WorkerState::Failed);
    }

    // ========== Command Tests ==========

    #[test]
    fn duplicate_start_keeps_one_session() {
        let mut h = harness(vec![]);
        send(&h, start("cam1", "stub://ok"));
        send(&h, start("cam1", "stub://other"));

        h.worker.run_cycle();

        assert_eq!(h.worker.session_count(), 1);
        assert_eq!(h.worker.sessions[&id("cam1")].source_uri(), "stub://ok");
    }

    #[test]
    fn stop_closes_and_reports_once() {
        let mut h = harness(vec![]);
        send(&h, start("cam1", "stub://ok"));
        h.worker.run_cycle();
        let _: Vec<_> = h.results.try_iter().collect();

        send(&h, Command::stop("cam1").unwrap());
        send(&h, Command::stop("cam1").unwrap());
        h.worker.run_cycle();

        assert_eq!(h.worker.session_count(), 0);
        let events: Vec<_> = h.results.try_iter().collect();
        let closed = events
            .iter()
            .filter(|e| e.kind == EventKind::StreamClosed)
            .count();
        assert_eq!(closed, 1);
    }

    #[test]
    fn stop_of_unknown_stream_is_a_no_op() {
        let mut h = harness(vec![]);
        send(&h, Command::stop("ghost").unwrap());

        assert!(h.worker.run_cycle());
        assert!(h.results.is_empty());
    }

    // ========== Detection Loop Tests ==========

    #[test]
    fn frames_produce_filtered_clamped_detections() {
        let mut h = harness(vec![]);
        send(&h, start("cam1", "stub://ok"));

        h.worker.run_cycle(); // connects
        h.worker.run_cycle(); // reads one frame

        let event = h.results.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Detections);
        assert_eq!(event.detections.len(), 1);
        assert_eq!(event.detections[0].class_id, 2);
        assert_eq!(event.detections[0].bbox, [10.0, 10.0, 100.0, 50.0]);
    }

    #[test]
    fn inference_error_skips_the_frame_silently() {
        let mut h = harness(vec![1]);
        send(&h, start("cam1", "stub://ok"));

        h.worker.run_cycle();
        h.worker.run_cycle(); // frame 1 fails
        assert!(h.results.is_empty());

        h.worker.run_cycle(); // frame 2 succeeds
        assert_eq!(h.results.try_recv().unwrap().kind, EventKind::Detections);
        assert_eq!(h.worker.session_state(&id("cam1")), Some(StreamState::Active));
    }

    #[test]
    fn dead_stream_does_not_block_healthy_one() {
        let mut h = harness(vec![]);
        send(&h, start("cam-dead", "stub://dead"));
        send(&h, start("cam-ok", "stub://ok"));

        h.worker.run_cycle();
        h.worker.run_cycle();

        let events: Vec<_> = h.results.try_iter().collect();
        assert!(
            events
                .iter()
                .any(|e| e.stream_id.as_str() == "cam-ok" && e.kind == EventKind::Detections)
        );
        assert_eq!(
            h.worker.session_state(&id("cam-dead")),
            Some(StreamState::Active)
        );
    }

    #[test]
    fn connect_failure_emits_error_and_waits_for_backoff() {
        let mut h = harness(vec![]);
        send(&h, start("cam1", "rtsp://unreachable"));

        h.worker.run_cycle();
        let event = h.results.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Error);
        assert!(event.message.unwrap().contains("connect attempt 1 failed"));
        assert_eq!(
            h.worker.session_state(&id("cam1")),
            Some(StreamState::Reconnecting)
        );

        // Next attempt is a minute away: nothing to do.
        assert!(!h.worker.run_cycle());
        assert!(h.results.is_empty());
    }

    #[test]
    fn stale_stream_reports_error_then_reconnects() {
        let mut h = harness_with_backoff(vec![], Backoff::new(Duration::ZERO, Duration::ZERO));
        send(&h, start("cam1", "stub://flaky"));

        h.worker.run_cycle(); // connects
        h.worker.run_cycle(); // first read hits EOF

        let events: Vec<_> = h.results.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
        assert!(events[0].message.as_deref().unwrap().contains("stale"));
        assert_eq!(h.worker.session_state(&id("cam1")), Some(StreamState::Stale));

        h.worker.run_cycle(); // reconnects
        let session = &h.worker.sessions[&id("cam1")];
        assert_eq!(session.state(), StreamState::Active);
        assert_eq!(session.reconnect_attempts(), 0);
        assert!(h.results.is_empty());

        h.worker.run_cycle();
        assert_eq!(h.results.try_recv().unwrap().kind, EventKind::Detections);
    }

    // ========== Draining Tests ==========

    #[test]
    fn drain_closes_everything_and_releases_detector() {
        let mut h = harness(vec![]);
        send(&h, start("cam1", "stub://ok"));
        send(&h, start("cam2", "stub://dead"));
        h.worker.run_cycle();
        let _: Vec<_> = h.results.try_iter().collect();

        h.commands.request_shutdown();
        send(&h, start("cam3", "stub://ok"));
        let status = h.worker.status.clone();
        h.worker.run();

        assert_eq!(status.get(), WorkerState::Terminated);
        assert!(*h.released.lock().unwrap());
        let mut closed: Vec<_> = h
            .results
            .try_iter()
            .inspect(|e| assert_eq!(e.kind, EventKind::StreamClosed))
            .map(|e| e.stream_id.to_string())
            .collect();
        closed.sort();
        assert_eq!(closed, vec!["cam1", "cam2"]);
    }

    #[test]
    fn shutdown_command_in_queue_stops_processing() {
        let mut h = harness(vec![]);
        send(&h, Command::Shutdown);
        send(&h, start("cam1", "stub://ok"));

        h.worker.run_cycle();

        assert_eq!(h.worker.state(), WorkerState::Draining);
        assert_eq!(h.worker.session_count(), 0);
    }
}
