use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use gpu_hub::{
    alerts::AlertEngine,
    api::{ApiConfig, ApiState, spawn_api_server},
    config::load_config,
    room::{Room, RoomSettings},
    source::{NvidiaSmi, SystemSource},
    util::{get_bind_addr, get_node_name},
};
use tokio::sync::watch;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Single-node GPU monitor serving live frames and alerts
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: Option<String>,

    /// Address to bind to, overrides config and environment
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Name reported for this node
    #[arg(long)]
    name: Option<String>,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("gpu_hub", LevelFilter::DEBUG),
        ("gpu_hub_agent", LevelFilter::TRACE),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = load_config(args.file.as_deref())?;
    let thresholds = config.resolve_thresholds()?;

    let node_name = args
        .name
        .or_else(|| config.node_name.clone())
        .unwrap_or_else(get_node_name);

    let source = match &config.nvidia_smi {
        Some(binary) => SystemSource::new().with_gpu_probe(NvidiaSmi::new(binary)),
        None => SystemSource::new(),
    };

    let engine = AlertEngine::from_config(thresholds, &config.alerts);
    let room = Room::local(
        node_name.clone(),
        Arc::new(source),
        engine,
        RoomSettings::from(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bind_addr = args.bind.or(config.bind).unwrap_or_else(get_bind_addr);
    let state = ApiState::new(room.clone(), config.thresholds_path.clone());
    let addr = spawn_api_server(ApiConfig::new(bind_addr), state, shutdown_rx).await?;

    info!("monitoring {node_name}, stream at ws://{addr}/api/v1/stream");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    shutdown_tx.send_replace(true);
    room.shutdown(config.shutdown_grace()).await;

    Ok(())
}
