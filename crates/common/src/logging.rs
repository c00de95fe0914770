use crate::config::Environment;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

/// `RUST_LOG`, or `info` when unset or invalid.
pub(crate) fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log line formatter: JSON in production, compact human-readable lines in
/// development. Always writes to stderr; stdout carries result output.
pub(crate) fn fmt_layer<S>(environment: Environment) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match environment {
        Environment::Production => tracing_subscriber::fmt::layer()
            .json()
            .with_level(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
        Environment::Development => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

/// Install the global subscriber without OpenTelemetry export.
///
/// A second call in the same process is ignored.
pub fn setup_logging(environment: Environment) {
    let result = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer(environment))
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
