use anyhow::{Context, Result};
use calendarsync_auth::YamlTokenStore;
use calendarsync_core::config::File as SyncConfig;
use calendarsync_core::{filter, time, transform};
use calendarsync_sync::{Controller, RunSummary};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod adapters;
mod config;

use config::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    calendarsync_shared::init_env();
    let cli = Cli::parse();
    let _guard = calendarsync_shared::init_tracing(&cli.log_level, Some("logs"));

    match run(cli).await {
        Ok(summary) => {
            tracing::info!(
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                "run complete"
            );
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary> {
    let file = SyncConfig::load(&cli.config).with_context(|| format!("loading config from {}", cli.config))?;

    let store_path = file
        .auth
        .config
        .get("path")
        .and_then(|v| v.as_str())
        .unwrap_or("calendarsync-tokens.yaml");
    let store = YamlTokenStore::new(store_path, cli.encryption_key());

    let auth_ctx = adapters::AuthContext { store: &store, open_browser: cli.open_browser, port: cli.port };

    let source = adapters::build_source(&file.source.adapter, &auth_ctx)
        .await
        .with_context(|| format!("constructing source adapter '{}'", file.source.adapter.kind))?;
    let sink = adapters::build_sink(&file.sink.adapter, &auth_ctx)
        .await
        .with_context(|| format!("constructing sink adapter '{}'", file.sink.adapter.kind))?;

    let filters = filter::build_pipeline(&file.filters)?;
    let transformers = transform::build_pipeline(&file.transformations)?;

    let start = time::resolve(&file.sync.start)?;
    let end = time::resolve(&file.sync.end)?;
    tracing::info!(%start, %end, "resolved sync window");

    let controller = Controller::new(source, sink, filters, transformers)
        .with_concurrency(file.update_concurrency.unwrap_or(1));

    let cancellation = CancellationToken::new();
    let watcher = cancellation.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::warn!("shutdown signal received, cancelling in-flight work");
        watcher.cancel();
    });

    let summary = if cli.clean {
        controller.clean_up(start, end, cancellation).await?
    } else {
        controller.synchronise_timeframe(start, end, cli.dry_run, cancellation).await?
    };

    Ok(summary)
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
