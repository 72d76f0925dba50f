//! Campaign Relay: routes user events and attribute changes to marketing
//! campaigns and schedules their deliveries.
//!
//! Main entry point that wires the store, routing, scheduler and channels
//! together and starts the servers.

use campaign_api::{ApiServer, EventIngress};
use campaign_channels::ChannelRegistry;
use campaign_core::config::{AppConfig, RoutingMode};
use campaign_orchestrator::{
    spawn_routed_sink, CampaignOrchestrator, DeliveryExecutor, InMemoryCampaignStore,
    InMemorySegmentDirectory, Qualification,
};
use campaign_routing::{nats, spawn_change_feed, spawn_pipeline};
use campaign_scheduler::DeliveryScheduler;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_LOG_FILTER: &str = "campaign_relay=info,campaign_api=info,\
campaign_orchestrator=info,campaign_scheduler=info,campaign_routing=info,\
campaign_channels=info,tower_http=info";

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Direct,
    Stream,
}

impl From<ModeArg> for RoutingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Direct => RoutingMode::Direct,
            ModeArg::Stream => RoutingMode::Stream,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "campaign-relay")]
#[command(about = "Routes user events to campaigns and schedules their deliveries")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_RELAY__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_RELAY__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Event routing mode (overrides config)
    #[arg(long, value_enum, env = "CAMPAIGN_RELAY__ROUTING__MODE")]
    routing_mode: Option<ModeArg>,

    /// Routing pipeline partitions (overrides config)
    #[arg(long, env = "CAMPAIGN_RELAY__ROUTING__PARTITIONS")]
    partitions: Option<usize>,

    /// Do not subscribe to NATS even if enabled in config
    #[arg(long, default_value_t = false)]
    no_nats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Relay starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(mode) = cli.routing_mode {
        config.routing.mode = mode.into();
    }
    if let Some(partitions) = cli.partitions {
        config.routing.partitions = partitions;
    }
    if cli.no_nats {
        config.nats.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        routing_mode = ?config.routing.mode,
        timezone = %config.scheduler.timezone,
        nats = config.nats.enabled,
        "Configuration loaded"
    );

    // Collaborators
    let store = InMemoryCampaignStore::shared();
    let directory = Arc::new(InMemorySegmentDirectory::new());
    let qualification = Qualification::standard(directory.clone());
    let registry = Arc::new(ChannelRegistry::from_config(&config.channels));
    info!(channels = ?registry.available_channels(), "Channel registry ready");

    let executor = Arc::new(
        DeliveryExecutor::new(registry, qualification.clone()).with_node_id(config.node_id.clone()),
    );

    let scheduler = DeliveryScheduler::new(&config.scheduler)?;
    let timer = scheduler.start();

    let orchestrator = Arc::new(CampaignOrchestrator::new(
        store.clone(),
        scheduler.clone(),
        qualification,
        directory,
        executor,
    ));

    // Event routing
    let routing = match config.routing.mode {
        RoutingMode::Direct => None,
        RoutingMode::Stream => {
            let (handle, routed) = spawn_pipeline(config.routing.partitions);
            spawn_change_feed(handle.clone(), store.subscribe_changes());
            spawn_routed_sink(orchestrator.clone(), routed);
            info!(partitions = handle.partitions(), "Streaming router started");
            Some(handle)
        }
    };

    let ingress = Arc::new(match &routing {
        Some(handle) => EventIngress::streaming(orchestrator.clone(), handle.clone()),
        None => EventIngress::direct(orchestrator.clone()),
    });

    if config.nats.enabled {
        match nats::connect(&config.nats).await {
            Ok(client) => {
                let mirror = store.clone();
                nats::spawn_change_consumer(
                    client.clone(),
                    config.nats.change_subject.clone(),
                    move |change| mirror.apply_change(&change),
                );
                let events = ingress.clone();
                nats::spawn_event_consumer(
                    client,
                    config.nats.event_subject.clone(),
                    move |event| events.notify_user_event(event),
                );
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to NATS, serving HTTP only");
            }
        }
    } else {
        info!("NATS disabled, serving HTTP only");
    }

    let api_server = ApiServer::new(config.clone(), ingress);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Campaign Relay is ready to serve traffic");

    tokio::select! {
        result = api_server.start_http() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    if let Some(handle) = routing {
        handle.shutdown().await;
    }
    scheduler.shutdown();
    let _ = timer.await;

    info!("Campaign Relay stopped");
    Ok(())
}
