use crate::{
    config::SupervisorConfig,
    errors::{DispatchError, SupervisorError},
    metrics::DispatchMetrics,
    router::CommandRouter,
    worker::{ExitGuard, Worker, WorkerExit, WorkerReport, WorkerSettings, WorkerState, WorkerStatus},
};
use bridge::{
    BridgeError, CommandReceiver, CommandSender, ResultSink, ResultStream, command_channel,
    result_channel,
};
use capture::SourceConnector;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use inference::{Accelerator, DetectorLoader};
use opentelemetry::KeyValue;
use schema::{Command, StreamId};
use std::{
    collections::BTreeSet,
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};

/// Owns the worker pool, routes commands to it, and hands out the shared
/// result stream.
///
/// Workers are named OS threads, one per configured slot, each bound to an
/// accelerator round-robin. `dispatch` may be called from any number of
/// threads.
pub struct Supervisor {
    config: SupervisorConfig,
    router: CommandRouter,
    accelerators: Vec<Accelerator>,
    senders: Vec<CommandSender>,
    statuses: Vec<WorkerStatus>,
    handles: Vec<Option<JoinHandle<()>>>,
    exits: Receiver<WorkerExit>,
    sink: ResultSink,
    results: ResultStream,
    metrics: DispatchMetrics,
    stopped: bool,
}

struct WorkerSpawn<L> {
    worker_id: usize,
    accelerator: Accelerator,
    loader: Arc<L>,
    commands: CommandReceiver,
    results: ResultSink,
    connector: Arc<dyn SourceConnector>,
    settings: WorkerSettings,
    status: WorkerStatus,
    reports: Sender<WorkerReport>,
    exits: Sender<WorkerExit>,
}

fn spawn_worker<L: DetectorLoader>(spawn: WorkerSpawn<L>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("worker-{}", spawn.worker_id))
        .spawn(move || {
            let WorkerSpawn {
                worker_id,
                accelerator,
                loader,
                commands,
                results,
                connector,
                settings,
                status,
                reports,
                exits,
            } = spawn;

            let _exit = ExitGuard {
                worker_id,
                status: status.clone(),
                exits,
            };
            let _span =
                tracing::info_span!("worker", worker_id, accelerator = %accelerator).entered();

            match Worker::initialize(
                worker_id,
                accelerator,
                loader.as_ref(),
                commands,
                results,
                connector,
                settings,
                status,
            ) {
                Ok(worker) => {
                    let _ = reports.send(WorkerReport::Ready { worker_id });
                    drop(reports);
                    worker.run();
                }
                Err(error) => {
                    let _ = reports.send(WorkerReport::LoadFailed { worker_id, error });
                }
            }
        })
}

impl Supervisor {
    /// Spawn the worker pool and wait until every worker has loaded its model.
    ///
    /// If any worker fails to load, or the pool is not ready within
    /// `startup_timeout`, the workers already started are shut down and the
    /// error is returned.
    pub fn start<L: DetectorLoader>(
        config: SupervisorConfig,
        connector: Arc<dyn SourceConnector>,
        loader: L,
    ) -> Result<Self, SupervisorError> {
        config.validate()?;

        let worker_count = config.worker_count;
        let loader = Arc::new(loader);
        let settings = WorkerSettings {
            policy: config.session_policy(),
            filter: config.post_filter(),
            idle_poll: config.idle_poll,
        };
        let (sink, results) = result_channel(config.result_queue_capacity);
        let (report_tx, report_rx) = unbounded();
        let (exit_tx, exit_rx) = unbounded();

        tracing::info!(
            worker_count,
            accelerators = ?config.accelerators,
            "Starting supervisor"
        );

        let mut supervisor = Self {
            router: CommandRouter::new(worker_count),
            accelerators: Vec::with_capacity(worker_count),
            senders: Vec::with_capacity(worker_count),
            statuses: Vec::with_capacity(worker_count),
            handles: Vec::with_capacity(worker_count),
            exits: exit_rx,
            sink: sink.clone(),
            results,
            metrics: DispatchMetrics::init(),
            stopped: false,
            config,
        };

        for worker_id in 0..worker_count {
            let accelerator = supervisor.config.accelerator_for(worker_id);
            let (tx, rx) = command_channel(supervisor.config.command_queue_capacity);
            let status = WorkerStatus::default();

            let spawned = spawn_worker(WorkerSpawn {
                worker_id,
                accelerator,
                loader: Arc::clone(&loader),
                commands: rx,
                results: sink.clone(),
                connector: Arc::clone(&connector),
                settings,
                status: status.clone(),
                reports: report_tx.clone(),
                exits: exit_tx.clone(),
            });

            match spawned {
                Ok(handle) => {
                    supervisor.accelerators.push(accelerator);
                    supervisor.senders.push(tx);
                    supervisor.statuses.push(status);
                    supervisor.handles.push(Some(handle));
                }
                Err(source) => {
                    tracing::error!(worker_id, error = %source, "Failed to spawn worker");
                    supervisor.abort_startup();
                    return Err(SupervisorError::Spawn { worker_id, source });
                }
            }
        }
        drop(report_tx);
        drop(exit_tx);

        if let Err(e) = supervisor.await_ready(&report_rx) {
            supervisor.abort_startup();
            return Err(e);
        }

        tracing::info!(worker_count, "All workers running");
        Ok(supervisor)
    }

    fn await_ready(&self, reports: &Receiver<WorkerReport>) -> Result<(), SupervisorError> {
        let deadline = Instant::now() + self.config.startup_timeout;
        let mut pending: BTreeSet<usize> = (0..self.senders.len()).collect();

        while !pending.is_empty() {
            match reports.recv_deadline(deadline) {
                Ok(WorkerReport::Ready { worker_id }) => {
                    pending.remove(&worker_id);
                    tracing::debug!(worker_id, "Worker ready");
                }
                Ok(WorkerReport::LoadFailed { worker_id, error }) => {
                    return Err(SupervisorError::ModelLoadFailed {
                        worker_id,
                        source: error,
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SupervisorError::StartupTimeout {
                        workers: pending.into_iter().collect(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SupervisorError::WorkerLost {
                        workers: pending.into_iter().collect(),
                    });
                }
            }
        }
        Ok(())
    }

    fn abort_startup(&mut self) {
        if let Err(e) = self.stop_workers() {
            tracing::warn!(error = %e, "Workers left behind after failed startup");
        }
    }

    /// Route `command` to the worker owning its stream.
    ///
    /// `Shutdown` is not queued: it raises the shutdown signal on every worker
    /// and returns immediately. Call [`Supervisor::shutdown`] to wait for the
    /// workers to finish.
    pub fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        let Some(stream_id) = command.stream_id().cloned() else {
            tracing::info!("SHUTDOWN dispatched, signalling all workers");
            self.signal_shutdown();
            return Ok(());
        };

        let kind = command.kind();
        let worker_id = self.router.route(&stream_id);
        let sender = &self.senders[worker_id];

        if sender.is_shutdown_requested() || self.statuses[worker_id].get().is_finished() {
            return Err(self.reject(DispatchError::UnknownTarget {
                worker_id,
                stream_id,
            }));
        }

        match sender.send(command, self.config.dispatch_timeout) {
            Ok(()) => {
                self.metrics
                    .dispatched
                    .add(1, &[KeyValue::new("command", kind)]);
                tracing::debug!(%stream_id, worker_id, command = kind, "Command dispatched");
                Ok(())
            }
            Err(BridgeError::QueueFull) => {
                Err(self.reject(DispatchError::QueueFull {
                    worker_id,
                    stream_id,
                }))
            }
            Err(BridgeError::Disconnected) => Err(self.reject(DispatchError::UnknownTarget {
                worker_id,
                stream_id,
            })),
        }
    }

    fn reject(&self, error: DispatchError) -> DispatchError {
        let reason = match error {
            DispatchError::QueueFull { .. } => "queue_full",
            DispatchError::UnknownTarget { .. } => "unknown_target",
        };
        self.metrics
            .rejected
            .add(1, &[KeyValue::new("reason", reason)]);
        tracing::warn!(error = %error, "Command rejected");
        error
    }

    /// Worker index that owns `stream_id`.
    pub fn route(&self, stream_id: &StreamId) -> usize {
        self.router.route(stream_id)
    }

    pub fn worker_count(&self) -> usize {
        self.router.worker_count()
    }

    pub fn accelerators(&self) -> &[Accelerator] {
        &self.accelerators
    }

    /// Consumer handle of the shared result channel. Clones share the queue:
    /// each event is received once.
    pub fn results(&self) -> ResultStream {
        self.results.clone()
    }

    /// Events discarded because the result channel was full.
    pub fn dropped_results(&self) -> u64 {
        self.sink.dropped()
    }

    /// Current lifecycle state of every worker, indexed by worker id.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.statuses.iter().map(WorkerStatus::get).collect()
    }

    /// Signal every worker to drain and wait for all of them to exit.
    ///
    /// Workers still running after `shutdown_timeout` are detached and
    /// reported in [`SupervisorError::ShutdownTimeout`]; they keep their
    /// shutdown signal and release their streams when they get to it.
    pub fn shutdown(mut self) -> Result<(), SupervisorError> {
        tracing::info!("Supervisor shutting down");
        self.stop_workers()
    }

    fn signal_shutdown(&self) {
        for sender in &self.senders {
            sender.request_shutdown();
        }
    }

    fn stop_workers(&mut self) -> Result<(), SupervisorError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.signal_shutdown();

        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut pending: BTreeSet<usize> = self
            .handles
            .iter()
            .enumerate()
            .filter_map(|(id, handle)| handle.as_ref().map(|_| id))
            .collect();

        while !pending.is_empty() {
            match self.exits.recv_deadline(deadline) {
                Ok(WorkerExit { worker_id, state }) => {
                    pending.remove(&worker_id);
                    if let Some(handle) = self.handles.get_mut(worker_id).and_then(Option::take)
                        && handle.join().is_err()
                    {
                        tracing::error!(worker_id, "Worker thread panicked");
                    }
                    tracing::info!(worker_id, state = state.as_str(), "Worker exited");
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if pending.is_empty() {
            return Ok(());
        }

        for &worker_id in &pending {
            if let Some(handle) = self.handles.get_mut(worker_id) {
                handle.take();
            }
            tracing::error!(worker_id, "Worker did not stop in time, detaching");
        }
        Err(SupervisorError::ShutdownTimeout {
            workers: pending.into_iter().collect(),
        })
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if !self.stopped {
            tracing::warn!("Supervisor dropped without shutdown, detaching workers");
            self.signal_shutdown();
        }
    }
}
