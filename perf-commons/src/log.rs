use std::{fs::File, path::Path, sync::OnceLock};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACER: OnceLock<()> = OnceLock::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Installs the global fmt subscriber. Logs go to stderr, or to
/// `perf-commons.log` inside `log_dir` when one is given. `RUST_LOG` overrides
/// `level`.
pub fn setup_logger(
    log_dir: Option<&Path>,
    level: LevelFilter,
    _ep: &str,
) -> Result<(), BoxError> {
    if TRACER.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let layer = match log_dir {
        Some(dir) => {
            let file = File::create(dir.join("perf-commons.log"))?;
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(file);
            LOG_GUARD.set(guard).ok();
            fmt::layer()
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(non_blocking_writer)
                .boxed()
        }
        None => fmt::layer()
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    TRACER.get_or_init(|| {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .ok();
    });

    Ok(())
}

pub fn shutdown() {}
