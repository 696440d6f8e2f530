//! dynapi server.
//!
//! # Architecture Overview
//!
//! ```text
//!     projects file ──▶ ┌──────────────┐  change feed  ┌──────────────┐
//!     admin API ──────▶ │ config store │ ────────────▶ │   listener   │
//!                       └──────┬───────┘               └──────┬───────┘
//!                              │ list_projects / get_schema   │ request_reload
//!                              ▼                              ▼
//!                       ┌──────────────────────────────────────────────┐
//!                       │ reload orchestrator (one worker, depth one)  │
//!                       │   compile schemas → synthesize routes        │
//!                       └──────────────────────┬───────────────────────┘
//!                                              │ atomic install
//!                                              ▼
//!     Client Request ──▶ http server ──▶ routing table snapshot ──▶ CRUD adapter ──▶ collection
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use dynapi::config::loader::load_config;
use dynapi::config::AppConfig;
use dynapi::lifecycle::{spawn_signal_handler, Engine, Shutdown};
use dynapi::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "dynapi", version, about = "Runtime-provisioned CRUD endpoints")]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, env = "DYNAPI_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long, env = "DYNAPI_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dynapi starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let engine = Engine::start(&config, &shutdown).await?;
    spawn_signal_handler(shutdown.clone(), engine.orchestrator.clone());

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let admin = engine.admin_router(&config);
        let mut admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(admin_listener, admin)
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    engine
        .http_server(&config)
        .run(listener, shutdown.subscribe())
        .await?;

    engine.join().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
