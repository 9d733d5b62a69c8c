use std::net::SocketAddr;

use clap::Parser;
use gpu_hub::{
    alerts::AlertEngine,
    api::{ApiConfig, ApiState, spawn_api_server},
    config::load_config,
    registry::{NodeRegistry, ReconnectPolicy},
    room::{Room, RoomSettings},
    util::get_bind_addr,
};
use tokio::sync::watch;
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Cluster hub aggregating the streams of many GPU nodes
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: Option<String>,

    /// Address to bind to, overrides config and environment
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Stream URL of a node, may be repeated
    #[arg(long = "node")]
    nodes: Vec<String>,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("gpu_hub", LevelFilter::DEBUG),
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

    let registry = NodeRegistry::websocket(ReconnectPolicy::from(&config));
    for url in config.nodes.iter().chain(&args.nodes) {
        registry.register(url).await;
    }

    if registry.is_empty().await {
        warn!("no nodes configured, register them via POST /api/v1/nodes");
    }

    let engine = AlertEngine::from_config(thresholds, &config.alerts);
    let room = Room::cluster(registry.clone(), engine, RoomSettings::from(&config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bind_addr = args.bind.or(config.bind).unwrap_or_else(get_bind_addr);
    let state = ApiState::new(room.clone(), config.thresholds_path.clone());
    let addr = spawn_api_server(ApiConfig::new(bind_addr), state, shutdown_rx).await?;

    info!(
        "hub with {} nodes, stream at ws://{addr}/api/v1/stream",
        registry.len().await
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    let grace = config.shutdown_grace();
    shutdown_tx.send_replace(true);
    registry.shutdown(grace).await;
    room.shutdown(grace).await;

    Ok(())
}
