use crate::config::Environment;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

/// `RUST_LOG` filter, `info` when unset or invalid.
pub(crate) fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Formatting layer writing to stderr: JSON in production, pretty otherwise.
/// Stdout is left to command output.
pub(crate) fn fmt_layer<S>(environment: Environment) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match environment {
        Environment::Production => tracing_subscriber::fmt::layer()
            .json()
            .with_level(true)
            .with_writer(std::io::stderr)
            .boxed(),
        Environment::Development => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

/// Install the global subscriber for runs without OTLP export.
///
/// When an exporter is configured use `TelemetryGuard::init` instead; it
/// installs the same layers plus the OpenTelemetry one.
pub fn setup_logging(environment: Environment) {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer(environment))
        .init();
}
