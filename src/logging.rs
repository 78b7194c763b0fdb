//! Tracing subscriber setup.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "pontual=info,tower_http=info";

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber. Console output goes to stderr.
///
/// `RUST_LOG` overrides `default_filter`. With `directory` set, a daily
/// rolling `pontual.log` is written there as well; keep the returned guard
/// alive for the life of the process or buffered lines are lost.
pub fn init_tracing(
    default_filter: &str,
    log_json: bool,
    directory: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let console = if log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file, guard) = match directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "pontual.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(console)
        .with(file)
        .try_init()?;
    Ok(guard)
}
