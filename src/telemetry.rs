use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{subscriber::set_global_default, Instrument, Subscriber};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{
    fmt::MakeWriter, prelude::__tracing_subscriber_SubscriberExt, EnvFilter, Registry,
};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to bridge `log` records into tracing")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),
    #[error("A global tracing subscriber is already installed")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs a global Bunyan JSON subscriber writing to `sink`. `RUST_LOG`
/// takes precedence over `env_filter`.
pub fn init<Sink>(name: &str, env_filter: &str, sink: Sink) -> Result<(), TelemetryError>
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    LogTracer::init()?;
    set_global_default(assertion_subscriber(name, env_filter, sink))?;
    Ok(())
}

/// Telemetry for test binaries: assertion events go to stdout when
/// `TEST_LOG` is `true`, and are discarded otherwise.
pub fn init_for_tests(name: &str) -> Result<(), TelemetryError> {
    let verbose = std::env::var("TEST_LOG")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);
    if verbose {
        init(name, "asserto=debug,info", std::io::stdout)
    } else {
        init(name, "asserto=debug,info", std::io::sink)
    }
}

fn assertion_subscriber<Sink>(
    name: &str,
    env_filter: &str,
    sink: Sink,
) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    Registry::default()
        .with(filter)
        .with(JsonStorageLayer)
        .with(BunyanFormattingLayer::new(name.into(), sink))
}

/// Spawns `future` inside the caller's current span.
pub fn spawn_with_tracing<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future.instrument(tracing::Span::current()))
}
