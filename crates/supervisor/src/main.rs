use anyhow::Context;
use capture::SyntheticConnector;
use common::{TelemetryGuard, setup_logging};
use crossbeam_channel::{RecvTimeoutError, Sender};
use inference::backend::noop::NoopLoader;
use schema::Command;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::{
    io::{self, BufRead, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use supervisor::{Supervisor, SupervisorConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

enum Input {
    Command(Command),
    Closed,
}

/// Parse stdin line by line. Unparsable lines are logged and skipped.
fn read_commands(tx: Sender<Input>) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Command::from_json(&line) {
            Ok(command) => {
                if tx.send(Input::Command(command)).is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, line = %line, "Skipping invalid command"),
        }
    }
    let _ = tx.send(Input::Closed);
}

/// Print every result as one JSON line until `done` is raised.
fn write_results(results: bridge::ResultStream, done: Arc<AtomicBool>) {
    let stdout = io::stdout();
    while !done.load(Ordering::SeqCst) {
        let Some(event) = results.recv_timeout(POLL_INTERVAL) else {
            continue;
        };
        let line = match event.to_json() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event");
                continue;
            }
        };
        let mut out = stdout.lock();
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            tracing::error!(error = %e, "Failed to write to stdout, dropping results");
            return;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let config = SupervisorConfig::from_env()?;

    // The OTLP exporters are async: keep the runtime alive as long as the guard.
    let (_telemetry, _runtime) = if let Some(endpoint) = config.otel_endpoint.as_ref() {
        let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
        let guard = rt.block_on(async {
            TelemetryGuard::init("stream-supervisor", endpoint, config.environment)
        })?;
        (Some(guard), Some(rt))
    } else {
        setup_logging(config.environment);
        (None, None)
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    tracing::info!(?config, "Stream supervisor starting");

    let supervisor = Supervisor::start(
        config,
        Arc::new(SyntheticConnector::default()),
        NoopLoader,
    )
    .context("Failed to start worker pool")?;

    let writer_done = Arc::new(AtomicBool::new(false));
    let writer = {
        let results = supervisor.results();
        let done = Arc::clone(&writer_done);
        thread::Builder::new()
            .name("result-writer".to_string())
            .spawn(move || write_results(results, done))
            .context("Failed to spawn result writer")?
    };

    let (input_tx, input_rx) = crossbeam_channel::bounded(64);
    thread::Builder::new()
        .name("command-reader".to_string())
        .spawn(move || read_commands(input_tx))
        .context("Failed to spawn command reader")?;

    while !shutdown.load(Ordering::SeqCst) {
        match input_rx.recv_timeout(POLL_INTERVAL) {
            Ok(Input::Command(Command::Shutdown)) => {
                tracing::info!("SHUTDOWN received on stdin");
                break;
            }
            Ok(Input::Command(command)) => {
                if let Err(e) = supervisor.dispatch(command) {
                    tracing::warn!(error = %e, "Dispatch failed");
                }
            }
            Ok(Input::Closed) | Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("stdin closed");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let results = supervisor.results();
    let dropped = supervisor.dropped_results();
    let outcome = supervisor.shutdown();

    writer_done.store(true, Ordering::SeqCst);
    if writer.join().is_err() {
        tracing::error!("Result writer panicked");
    }

    // Events published while draining, StreamClosed included.
    let mut out = io::stdout().lock();
    for event in results.try_iter() {
        if let Ok(line) = event.to_json() {
            writeln!(out, "{line}")?;
        }
    }
    out.flush()?;

    if dropped > 0 {
        tracing::warn!(dropped, "Results dropped because the output could not keep up");
    }

    outcome.context("Supervisor shutdown failed")?;
    tracing::info!("Stream supervisor stopped");
    Ok(())
}
