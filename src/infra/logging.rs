//! For setting up logging.

use super::config::LoggingConfig;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LEVEL: &str = "info,tower_http=debug,item_service=debug";

/// Flushes logs upon being dropped.
#[derive(Debug)]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

/// Initializes logging.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> color_eyre::Result<LogGuard> {
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| config.level.clone())
        .unwrap_or_else(|| DEFAULT_LEVEL.into());
    let mut guards = Vec::new();

    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);
    let stdout = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_stdout)
        .with_filter(EnvFilter::new(&log_level));

    let file_appender = config.directory.as_ref().map(|directory| {
        let file_appender = tracing_appender::rolling::hourly(directory, "log.");
        let (non_blocking_file_appender, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_file_appender)
            .json()
            .with_filter(EnvFilter::new(&log_level))
    });

    let opentelemetry = match &config.otlp_endpoint {
        Some(endpoint) => {
            let app_name = env!("CARGO_PKG_NAME");
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint.clone()),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config()
                        .with_resource(Resource::new(vec![KeyValue::new("service.name", app_name)])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            let layer = tracing_opentelemetry::layer()
                .with_tracer(tracer)
                .with_filter(EnvFilter::new(&log_level));
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(file_appender)
        .with(opentelemetry)
        .with(ErrorLayer::default())
        .try_init()?;

    Ok(LogGuard { _guards: guards })
}
