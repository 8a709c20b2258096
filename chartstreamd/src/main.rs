// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

use chartstreamd::{
    Admin, AppState, BackendRegistry, Chart, ConfigStore, DataSource, MemStore, Mirror, Sessions,
    prometheus, serve,
};

/// Live chart metric streaming daemon
#[derive(Parser, Debug)]
#[command(name = "chartstreamd")]
#[command(about = "Stream chart metrics from monitoring backends over WebSockets")]
struct Args {
    /// Listen address for the HTTP API
    #[arg(long, default_value = "0.0.0.0:8080", env = "CHARTSTREAM_LISTEN")]
    listen: String,

    /// How long reads wait for the config mirrors' initial sync, in seconds
    #[arg(long, default_value_t = 5, env = "CHARTSTREAM_READY_TIMEOUT_SECS")]
    ready_timeout_secs: u64,

    /// Per-backend bound on one polling round, in seconds
    #[arg(long, default_value_t = 5, env = "CHARTSTREAM_QUERY_TIMEOUT_SECS")]
    query_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG takes precedence, fallback to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %args.listen,
        "chartstreamd starting"
    );

    let mut registry = BackendRegistry::new();
    prometheus::register(&mut registry).context("registering the prometheus backend")?;
    let registry = Arc::new(registry);

    let store: Arc<dyn ConfigStore> = Arc::new(MemStore::new());
    let ready_timeout = Duration::from_secs(args.ready_timeout_secs);
    let datasources = Arc::new(
        Mirror::<DataSource>::start(store.as_ref(), ready_timeout)
            .await
            .context("starting the datasource mirror")?,
    );
    let charts = Arc::new(
        Mirror::<Chart>::start(store.as_ref(), ready_timeout)
            .await
            .context("starting the chart mirror")?,
    );

    let admin = Admin::new(store, datasources, charts, Arc::clone(&registry));
    let sessions = Sessions::new(
        admin.clone(),
        registry,
        Duration::from_secs(args.query_timeout_secs),
    );
    let state = Arc::new(AppState { admin, sessions });

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;

    let shutdown = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("installing the SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing the SIGINT handler")?;
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
            shutdown.cancel();
        });
    }

    serve(listener, state, shutdown)
        .await
        .context("http server error")?;

    info!("chartstreamd stopped");
    Ok(())
}
