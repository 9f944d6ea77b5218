//! defman-server
//!
//! Serves the job API over HTTP. Shares on-disk state with the `defman`
//! CLI; both sides lock before mutating.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use defman_core::{
    BroadcastSink, ConfigLoader, DeployService, EventSink, FanoutSink, TracingSink,
};
use defman_server::{AppState, ServerError, router};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "defman_server=info,defman_core=info";

/// HTTP control plane for defman
#[derive(Parser, Debug)]
#[command(name = "defman-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Project root holding defman.toml
    #[arg(long, env = "DEFMAN_ROOT", default_value = ".")]
    root: PathBuf,

    /// Explicit config file, layered over the global and project configs
    #[arg(long, env = "DEFMAN_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "DEFMAN_LISTEN", default_value = "127.0.0.1:7878")]
    listen: SocketAddr,

    /// Events buffered per `/events` subscriber
    #[arg(long, default_value_t = 256)]
    event_capacity: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    let events = BroadcastSink::new(args.event_capacity);
    let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingSink), Arc::new(events.clone())];

    let root = args.root.clone();
    let config_file = args.config.clone();
    let service = DeployService::global_or_init(move || {
        let mut loader = ConfigLoader::new(root.clone());
        if let Some(path) = config_file {
            loader = loader.with_config_file(path);
        }
        DeployService::builder(loader.load()?, root)
            .sink(Arc::new(FanoutSink::new(sinks)))
            .build()
    })?;

    let recovering = service.clone();
    let recovered = tokio::task::spawn_blocking(move || recovering.recover())
        .await
        .map_err(|e| defman_core::Error::Task(e.to_string()))??;
    if !recovered.is_empty() {
        tracing::warn!(count = recovered.len(), "Rolled back unfinished deploys");
    }

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .map_err(|source| ServerError::Bind {
            addr: args.listen,
            source,
        })?;
    tracing::info!(
        addr = %args.listen,
        root = %service.project_root().display(),
        "defman-server listening"
    );

    axum::serve(listener, router(AppState::new(service, events)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("defman-server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
