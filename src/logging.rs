//! Tracing subscriber setup for the API process.
//!
//! Output goes to stdout, stderr or a (daily-rotated) file, as JSON in
//! production and human-readable text elsewhere. Spans are additionally
//! exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use anyhow::{Context, Result};
use opentelemetry::{KeyValue, trace::TraceError};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{Config as TraceConfig, RandomIdGenerator, Sampler, Tracer},
};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use std::{env, io, path::PathBuf, time::Duration};
use strum::EnumString;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, fmt::format::FmtSpan, prelude::*};

const DEFAULT_SERVICE: &str = "hotel-booking-api";
const QUIET_DEPENDENCIES: &str = "hyper=info,tower=info,tower_http=info,redb=info,h2=info";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Directory for `LogOutput::File`.
    pub log_dir: PathBuf,
    pub rotate_daily: bool,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    /// Spans are exported only when this is set.
    pub otlp_endpoint: Option<String>,
    /// Fraction of root traces kept, clamped to `0.0..=1.0`.
    pub trace_sample_ratio: f64,
    pub otlp_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

fn is_production(environment: &str) -> bool {
    matches!(environment, "production" | "prod")
}

/// Parse an environment variable, ignoring it when absent or unparseable.
fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok()?.trim().parse().ok()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("NODE_ENV"))
            .unwrap_or_else(|_| "development".into());
        let production = is_production(&environment);

        Self {
            format: if production { LogFormat::Json } else { LogFormat::Pretty },
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            rotate_daily: true,
            service_name: DEFAULT_SERVICE.into(),
            service_version: env!("CARGO_PKG_VERSION").into(),
            environment,
            otlp_endpoint: None,
            trace_sample_ratio: if production { 0.1 } else { 1.0 },
            otlp_timeout: Duration::from_secs(10),
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SAMPLING_RATE` and
    /// `OTEL_EXPORTER_OTLP_TIMEOUT` (seconds).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            format: env_parsed("LOG_FORMAT").unwrap_or(defaults.format),
            output: env_parsed("LOG_OUTPUT").unwrap_or(defaults.output),
            log_dir: env::var_os("LOG_DIR").map_or(defaults.log_dir, PathBuf::from),
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|endpoint| !endpoint.trim().is_empty()),
            trace_sample_ratio: env_parsed::<f64>("OTEL_SAMPLING_RATE")
                .map_or(defaults.trace_sample_ratio, |ratio| ratio.clamp(0.0, 1.0)),
            otlp_timeout: env_parsed("OTEL_EXPORTER_OTLP_TIMEOUT")
                .map_or(defaults.otlp_timeout, Duration::from_secs),
            ..defaults
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = if is_production(&self.environment) { "info" } else { "debug" };
            EnvFilter::new(format!("{level},{QUIET_DEPENDENCIES}"))
        })
    }

    fn writer(&self) -> Result<(NonBlocking, WorkerGuard)> {
        Ok(match self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File => {
                std::fs::create_dir_all(&self.log_dir).with_context(|| {
                    format!("failed to create log directory {}", self.log_dir.display())
                })?;
                let appender = if self.rotate_daily {
                    tracing_appender::rolling::daily(&self.log_dir, &self.service_name)
                } else {
                    tracing_appender::rolling::never(&self.log_dir, &self.service_name)
                };
                tracing_appender::non_blocking(appender)
            }
        })
    }

    fn trace_config(&self) -> TraceConfig {
        let sampler = match self.trace_sample_ratio {
            ratio if ratio >= 1.0 => Sampler::AlwaysOn,
            ratio if ratio <= 0.0 => Sampler::AlwaysOff,
            ratio => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(ratio))),
        };
        TraceConfig::default()
            .with_sampler(sampler)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(Resource::new([
                KeyValue::new(SERVICE_NAME, self.service_name.clone()),
                KeyValue::new(SERVICE_VERSION, self.service_version.clone()),
                KeyValue::new("deployment.environment", self.environment.clone()),
            ]))
    }
}

/// Batch OTLP exporter over gRPC. Installing it also registers the global
/// tracer provider that [`shutdown_telemetry`] flushes.
fn otlp_tracer(config: &LoggingConfig, endpoint: &str) -> Result<Tracer, TraceError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(config.otlp_timeout);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(config.trace_config())
        .install_batch(opentelemetry_sdk::runtime::Tokio)
}

/// Install the global subscriber. Keep the returned guard alive until exit,
/// dropping it flushes buffered lines.
///
/// A failing OTLP exporter is reported and skipped; logging still starts.
pub fn init_logging(config: LoggingConfig) -> Result<WorkerGuard> {
    let (writer, guard) = config.writer()?;

    let tracer = config
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| match otlp_tracer(&config, endpoint) {
            Ok(tracer) => Some(tracer),
            Err(e) => {
                eprintln!("OTLP export to {endpoint} disabled: {e}");
                None
            }
        });
    let exporting = tracer.is_some();

    let base = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)));

    match config.format {
        LogFormat::Json => base
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Pretty => base
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(writer)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        output = ?config.output,
        otlp = exporting,
        "logging initialized"
    );

    Ok(guard)
}

/// Flush pending spans and shut the OTLP pipeline down.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Warn-level event tagged with `security.event_type`, for rejected deliveries
/// and similar.
#[macro_export]
macro_rules! log_security_event {
    ($event_type:expr, $($arg:tt)*) => {
        tracing::warn!(security.event_type = %$event_type, $($arg)*);
    };
}
