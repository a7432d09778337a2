use opentelemetry_semantic_conventions::{
    resource::{SERVICE_NAME, SERVICE_VERSION},
    SCHEMA_URL,
};
use std::{
    fs::File,
    path::Path,
    sync::{mpsc, OnceLock},
};
use tracing::level_filters::LevelFilter;

use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{Sampler, SdkTracerProvider},
    Resource,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE: &str = "perf-commons";

static SUBSCRIBER_SET: OnceLock<()> = OnceLock::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();
static WORKER_HANDLE: OnceLock<std::thread::JoinHandle<()>> = OnceLock::new();

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn resource() -> Resource {
    Resource::builder()
        .with_schema_url(
            [
                KeyValue::new(SERVICE_NAME, SERVICE),
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            ],
            SCHEMA_URL,
        )
        .with_service_name(SERVICE)
        .build()
}

fn init_tracer_provider(ep: &str) -> Result<SdkTracerProvider, BoxError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(ep)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            1.0,
        ))))
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build())
}

/// Installs the global subscriber: a console or file fmt layer plus an OTLP
/// span exporter pointed at `endpoint`.
///
/// The exporter lives on its own runtime thread so callers may be sync or
/// async. Calling this more than once is a no-op.
pub fn setup_logger(
    log_dir: Option<&Path>,
    level: LevelFilter,
    endpoint: &str,
) -> Result<(), BoxError> {
    if SUBSCRIBER_SET.get().is_some() {
        return Ok(());
    }

    let (tx, rx) = mpsc::sync_channel(1);
    let endpoint_owned = endpoint.to_owned();

    let handle = std::thread::Builder::new()
        .name("otel-worker".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .worker_threads(2)
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tx.send(Err(BoxError::from(e))).ok();
                    return;
                }
            };

            rt.block_on(async move {
                tx.send(init_tracer_provider(&endpoint_owned)).ok();
                std::future::pending::<()>().await;
            });
        })?;

    let provider = rx.recv()??;
    TRACER_PROVIDER.set(provider.clone()).ok();
    WORKER_HANDLE.set(handle).ok();

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let fmt_layer = match log_dir {
        Some(dir) => {
            let file = File::create(dir.join("perf-commons.log"))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            LOG_GUARD.set(guard).ok();
            tracing_subscriber::fmt::layer()
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(writer)
                .boxed()
        }
        None => tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let otel_layer = OpenTelemetryLayer::new(provider.tracer(SERVICE));

    SUBSCRIBER_SET.get_or_init(|| {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()
            .ok();
    });

    Ok(())
}

/// Flushes pending spans. Call before process exit.
pub fn shutdown() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("otel shutdown error: {e}");
        }
    }
}
