use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use dashmap::DashMap;
use opentelemetry::{KeyValue, global, metrics::Counter};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource, logs::SdkLoggerProvider, metrics::SdkMeterProvider, trace::SdkTracerProvider,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

const SERVICE_NAME: &str = "cloudsweep";
const LOG_FILE: &str = "cloudsweep.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
}

impl LogConfig {
    pub fn new(log_level: impl Into<String>, log_dir: Option<PathBuf>, otel_endpoint: Option<String>) -> Self {
        Self {
            log_level: log_level.into(),
            log_dir,
            otel_endpoint,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info", None, None)
    }
}

/// Keeps the OTLP providers alive; flushes them on [`Telemetry::shutdown`].
#[derive(Default)]
pub struct Telemetry {
    logger_provider: Option<SdkLoggerProvider>,
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Some(provider) = self.logger_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("OTLP log provider did not shut down cleanly: {e}");
            }
        }
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("OTLP tracer provider did not shut down cleanly: {e}");
            }
        }
        if let Some(provider) = self.meter_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("OTLP meter provider did not shut down cleanly: {e}");
            }
        }
    }
}

fn resource() -> Resource {
    Resource::builder().with_service_name(SERVICE_NAME).build()
}

fn init_logs(endpoint: &str) -> Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .context("building the OTLP log exporter")?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build())
}

fn init_traces(endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .context("building the OTLP span exporter")?;
    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build())
}

fn init_metrics(endpoint: &str) -> Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .context("building the OTLP metric exporter")?;
    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource())
        .build())
}

/// Install the process-wide subscriber.
///
/// Human-readable logs go to stderr (stdout belongs to plugins that print
/// envelopes), optionally mirrored as JSON lines into a daily-rolling file under `log_dir`.
/// With an OTLP endpoint, logs, spans and metrics are exported over HTTP too.
pub fn init_tracing(config: &LogConfig) -> Result<Telemetry> {
    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log level `{}`", config.log_level))?;

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            Some(fmt::layer().json().with_writer(appender))
        }
        None => None,
    };

    let mut telemetry = Telemetry::default();
    let otel_layer = match config.otel_endpoint.as_deref() {
        Some(endpoint) => {
            let logger_provider = init_logs(endpoint)?;
            let tracer_provider = init_traces(endpoint)?;
            let meter_provider = init_metrics(endpoint)?;

            let bridge = OpenTelemetryTracingBridge::new(&logger_provider).with_filter(
                EnvFilter::new(&config.log_level)
                    .add_directive("hyper=off".parse()?)
                    .add_directive("h2=off".parse()?)
                    .add_directive("reqwest=off".parse()?),
            );
            global::set_tracer_provider(tracer_provider.clone());
            global::set_meter_provider(meter_provider.clone());

            telemetry.logger_provider = Some(logger_provider);
            telemetry.tracer_provider = Some(tracer_provider);
            telemetry.meter_provider = Some(meter_provider);
            Some(bridge)
        }
        None => None,
    };

    Registry::default()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(otel_layer)
        .try_init()
        .context("a tracing subscriber is already installed")?;

    if let Some(endpoint) = &config.otel_endpoint {
        info!("exporting telemetry to {}", endpoint);
    }
    if let Some(dir) = &config.log_dir {
        info!("logging to {}", dir.join(LOG_FILE).display());
    }
    Ok(telemetry)
}

/// Per-layer counts kept in process, alongside the exported counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayerTally {
    pub emitted: u64,
    pub consumed: u64,
    pub plugin_failures: u64,
    pub emit_failures: u64,
}

/// Pipeline counters, labelled by layer.
///
/// Recorded through the global meter, which is a no-op until OTLP export
/// is configured. The in-process tally backs the scan summary.
#[derive(Clone)]
pub struct PipelineMetrics {
    emitted: Counter<u64>,
    consumed: Counter<u64>,
    plugin_failures: Counter<u64>,
    emit_failures: Counter<u64>,
    tallies: Arc<DashMap<String, LayerTally>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let meter = global::meter(SERVICE_NAME);
        Self {
            emitted: meter
                .u64_counter("envelopes_emitted")
                .with_description("Envelopes pushed onto a writer queue")
                .build(),
            consumed: meter
                .u64_counter("envelopes_consumed")
                .with_description("Envelopes taken off a reader queue")
                .build(),
            plugin_failures: meter
                .u64_counter("plugin_failures")
                .with_description("Plugin calls that returned an error, panicked or timed out")
                .build(),
            emit_failures: meter
                .u64_counter("emit_failures")
                .with_description("Envelopes dropped because the writer queue refused them")
                .build(),
            tallies: Arc::new(DashMap::new()),
        }
    }

    fn bump(&self, counter: &Counter<u64>, layer: &str, field: impl FnOnce(&mut LayerTally)) {
        counter.add(1, &[KeyValue::new("layer", layer.to_string())]);
        field(&mut self.tallies.entry(layer.to_string()).or_default());
    }

    pub fn envelope_emitted(&self, layer: &str) {
        self.bump(&self.emitted, layer, |t| t.emitted += 1);
    }

    pub fn envelope_consumed(&self, layer: &str) {
        self.bump(&self.consumed, layer, |t| t.consumed += 1);
    }

    pub fn plugin_failed(&self, layer: &str) {
        self.bump(&self.plugin_failures, layer, |t| t.plugin_failures += 1);
    }

    pub fn emit_failed(&self, layer: &str) {
        self.bump(&self.emit_failures, layer, |t| t.emit_failures += 1);
    }

    pub fn tally(&self, layer: &str) -> LayerTally {
        self.tallies.get(layer).map(|t| *t).unwrap_or_default()
    }

    pub fn tallies(&self) -> Vec<(String, LayerTally)> {
        let mut all: Vec<(String, LayerTally)> =
            self.tallies.iter().map(|e| (e.key().clone(), *e.value())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Log a one-line summary per layer.
    pub fn log_summary(&self) {
        for (layer, t) in self.tallies() {
            if t.plugin_failures > 0 || t.emit_failures > 0 {
                warn!(
                    "layer `{}`: emitted {} consumed {} plugin failures {} dropped {}",
                    layer, t.emitted, t.consumed, t.plugin_failures, t.emit_failures
                );
            } else {
                info!("layer `{}`: emitted {} consumed {}", layer, t.emitted, t.consumed);
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
