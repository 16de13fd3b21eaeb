//! LocaLM Server - local chat completions
//!
//! Downloads the configured GGUF model if needed, loads it, and serves
//! chat completions over HTTP until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use localm_server::inference::{GenerationEngine, LlamaLoader};
use localm_server::lifecycle::{LifecycleController, MissingModelPolicy};
use localm_server::server::{run_server, AppState};
use localm_server::storage::huggingface::HuggingFaceSource;
use localm_server::storage::provisioner::{ArtifactSpec, ModelProvisioner};
use localm_server::storage::settings::load_settings;

#[derive(Debug, Parser)]
#[command(name = "localm-server", version, about = "Serve chat completions from a local model")]
struct Cli {
    /// Settings file (defaults to settings.json in the data directory)
    #[arg(long, env = "LOCALM_SETTINGS")]
    settings: Option<PathBuf>,

    #[arg(long, env = "LOCALM_HOST")]
    host: Option<String>,

    #[arg(long, env = "LOCALM_PORT")]
    port: Option<u16>,

    /// Where model files are cached
    #[arg(long, env = "LOCALM_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// Exit instead of serving 503s when the model cannot be provisioned
    #[arg(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("localm_server=info,tower_http=info")))
        .init();

    info!("Starting LocaLM Server v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let mut settings = load_settings(cli.settings.as_deref());
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(dir) = cli.models_dir {
        settings.models_directory = dir;
    }
    if cli.fail_fast {
        settings.missing_model_policy = MissingModelPolicy::FailFast;
    }
    settings.validate();

    let provisioner = ModelProvisioner::new(
        ArtifactSpec {
            repo_id: settings.repo_id.clone(),
            filename: settings.filename.clone(),
            revision: settings.revision.clone(),
            models_dir: settings.models_directory.clone(),
        },
        Arc::new(HuggingFaceSource::new()?),
    );

    let engine = Arc::new(GenerationEngine::new());
    let controller = Arc::new(LifecycleController::new(
        engine.clone(),
        provisioner,
        Arc::new(LlamaLoader {
            gpu_layers: settings.gpu_layers,
        }),
        settings.missing_model_policy,
        settings.drain_timeout(),
    ));

    controller.start().await?;

    let listener = TcpListener::bind(settings.bind_address()).await?;
    info!("Listening on {}", listener.local_addr()?);

    let lifecycle = controller.clone();
    let state = AppState::new(engine).with_default_options(settings.generation_defaults());
    run_server(state, listener, async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        lifecycle.shutdown().await;
    })
    .await?;

    info!("Server shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
