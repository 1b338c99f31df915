use anyhow::{Context, Result};
use cacheflush_server::{
    AdapterSet, AppState, AutoFlushScheduler, FlushCoordinator, LayerRegistry, OperationLedger,
    ServerConfig, create_router, init_metrics,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cacheflush-server")]
#[command(about = "Cache flush orchestrator", long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_found = args.config.exists();
    let mut config = if config_found {
        ServerConfig::from_file(&args.config)
            .with_context(|| format!("failed to load config {:?}", args.config))?
    } else {
        ServerConfig::default()
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config);
    info!("Starting Cacheflush Server v{}", env!("CARGO_PKG_VERSION"));
    if !config_found {
        warn!("Config {:?} not found, using defaults", args.config);
    }

    init_metrics();

    // Registry, adapters and ledger
    let registry = LayerRegistry::with_layers(config.layers.clone())?;
    let adapters = AdapterSet::from_specs(&config.adapters);
    for layer in registry.list() {
        if !adapters.contains(&layer.layer_id) {
            warn!("Layer {} has no adapter configured", layer.layer_id);
        }
    }
    let ledger = OperationLedger::open(&config.ledger).await?;

    let coordinator = FlushCoordinator::new(
        registry,
        adapters,
        ledger,
        config.to_coordinator_config(),
    );

    // Start auto-flush scheduler
    let scheduler = if config.scheduler.enabled {
        let scheduler = Arc::new(AutoFlushScheduler::new(
            coordinator.clone(),
            config.tick_interval(),
        ));
        Some((scheduler.clone(), scheduler.start()))
    } else {
        info!("Auto-flush scheduler disabled");
        None
    };

    // Create router
    let app = create_router(AppState::new(coordinator));

    // Bind server
    let addr = config.server_addr();
    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    if let Some((scheduler, handle)) = scheduler {
        scheduler.shutdown();
        handle.await?;
    }
    info!("Cacheflush Server stopped");

    Ok(())
}
