//! Offcache Daemon - cache-first HTTP front for a static origin

mod handler;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use offcache::{CacheStorage, ControllerConfig, HttpNetwork, OfflineCacheController};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Data directory holding the cache stores
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// JSON controller config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Origin to fetch from (overrides config)
    #[arg(short, long)]
    origin: Option<String>,

    /// Cache name (overrides config)
    #[arg(long)]
    cache_name: Option<String>,

    /// Install even if the named cache is already populated
    #[arg(long)]
    reinstall: bool,

    /// Health check mode (for Docker)
    #[arg(long)]
    health: bool,
}

fn load_config(args: &Args) -> Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    if let Some(origin) = &args.origin {
        config.origin = origin.clone();
    }
    if let Some(name) = &args.cache_name {
        config.cache_name = name.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    if args.health {
        match TcpStream::connect(&args.bind).await {
            Ok(_) => {
                println!("OK");
                std::process::exit(0);
            }
            Err(_) => {
                eprintln!("FAILED");
                std::process::exit(1);
            }
        }
    }

    let config = load_config(&args)?;

    info!("Starting Offcache Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Binding to {}", args.bind);
    info!("Data directory: {}", args.data.display());
    info!("Origin: {}", config.origin);
    info!("Cache name: {}", config.cache_name);

    let storage = CacheStorage::new(&args.data)?;
    for name in storage.keys()? {
        if name != config.cache_name {
            info!("Found unused store {:?}; it is not consulted", name);
        }
    }

    let network = HttpNetwork::new(config.request_timeout_secs.map(Duration::from_secs))?;
    let controller = Arc::new(OfflineCacheController::new(config, storage, network)?);

    let listener = TcpListener::bind(&args.bind).await?;
    info!("Server listening on {}", args.bind);

    server::spawn_install(Arc::clone(&controller), args.reinstall);

    println!("\nOffcache ready");
    println!("   Proxy:   http://{}", args.bind);
    println!("   Origin:  {}", controller.config().origin);
    println!("   Cache:   {}", controller.config().cache_name);
    println!("   Seeds:   {}", controller.config().seed_resources.len());
    println!("   State:   {:?}", controller.state());
    println!("\nPress Ctrl+C to stop\n");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Shutdown signal received");
    };
    server::serve(listener, Arc::clone(&controller), shutdown).await?;

    let stats = serde_json::to_string(&controller.stats().snapshot())?;
    info!("Shutting down; stats: {}", stats);
    Ok(())
}
