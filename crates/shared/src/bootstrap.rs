//! Ambient process bootstrap shared by the `calendarsync` binary: `.env`
//! loading and tracing initialization. Kept separate from the core crate so
//! that core stays free of process-wide state (the core and sync crates
//! take a logger-free, `tracing`-macro-only dependency; only this crate
//! decides how the subscriber is wired up).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Loads a `.env` file from the working directory, if present. A missing
/// file is not an error.
pub fn init_env() {
    dotenvy::dotenv().ok();
}

/// Initializes a `tracing` subscriber for the CLI process.
///
/// `level_filter` comes straight from the `--log-level` flag (falling back
/// to `RUST_LOG` if the environment variable is set, matching the
/// `tracing_subscriber::EnvFilter` convention). When `log_dir` is set, a
/// second, non-ANSI, line-buffered JSON layer writes to a daily-rolling
/// file in that directory so a long-running scheduled sync still leaves a
/// structured audit trail.
pub fn init_tracing(
    level_filter: &str,
    log_dir: Option<&str>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level_filter.into());

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    let registry = tracing_subscriber::registry().with(env_filter).with(stdout_layer);

    if let Some(log_dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(log_dir, "calendarsync.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer =
            tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking).json();

        registry.with(file_layer).init();
        Some(guard)
    } else {
        registry.init();
        None
    }
}
