use crowd_flow::alerts::memory::{MemoryBroker, MemoryTransport, serve_tcp};
use crowd_flow::alerts::tcp::TcpTransport;
use crowd_flow::alerts::{AlertChannel, TOPIC_LOCATIONS};
use crowd_flow::config::{self, Config, OccupancyKind, TransportKind};
use crowd_flow::engine::runtime::spawn_engine;
use crowd_flow::location::LocationFusion;
use crowd_flow::location::geocode::Geocoder;
use crowd_flow::occupancy::OccupancySource;
use crowd_flow::occupancy::peers::PeerReportSource;
use crowd_flow::occupancy::synthetic::SyntheticSource;
use crowd_flow::{api, state};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// Installs the global subscriber. Returns the configured level when it
/// could not be parsed, so it can be reported once logging is up.
fn init_tracing(level: &str) -> Option<String> {
    let (max_level, rejected) = match level.parse::<tracing::Level>() {
        Ok(parsed) => (parsed, None),
        Err(_) => (tracing::Level::INFO, Some(level.to_string())),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(max_level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    rejected
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    if let Some(level) = init_tracing(config.log_level()) {
        tracing::warn!(level = %level, "Unknown log level, using info");
    }
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "crowd-flow starting"
    );

    let state = Arc::new(RwLock::new(state::AppState::new(LocationFusion::new(
        config.degraded_accuracy_m(),
    ))));

    let alerts = if config.alerts_enabled() {
        let channel = Arc::new(build_alert_channel(&config).await?);
        channel.connect_with(Box::new(|| {
            tracing::info!("Alert subscriptions active");
        }));
        Some(channel)
    } else {
        tracing::warn!("Alerts disabled in [alerts].enabled");
        None
    };

    let source = build_occupancy_source(&config, alerts.as_deref());
    let engine_config = config.engine_config()?;
    let (engine, engine_task) =
        spawn_engine(&engine_config, source, Arc::clone(&state), alerts.clone());

    let geocoder = Geocoder::new(
        config.geocode_search_url(),
        config.geocode_reverse_url(),
        config.geocode_user_agent(),
        config.geocode_timeout(),
    )?;

    let app = api::router(api::ApiContext {
        state: Arc::clone(&state),
        engine: engine.clone(),
        geocoder: Arc::new(geocoder),
        alerts,
    });
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.stop();
    if let Err(err) = engine_task.await {
        tracing::error!(error = %err, "Engine task failed");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Build the alert channel for the configured transport, starting an
/// embedded broker first when `[alerts].listen_addr` is set.
async fn build_alert_channel(config: &Config) -> Result<AlertChannel, std::io::Error> {
    let broker = MemoryBroker::new();
    if let Some(listen_addr) = config.broker_listen_addr() {
        let listener = tokio::net::TcpListener::bind(listen_addr).await?;
        tracing::info!(addr = listen_addr, "Embedded alert broker listening");
        tokio::spawn(serve_tcp(listener, broker.clone()));
    }

    let channel_config = config.alert_channel_config();
    let channel = match config.alert_transport() {
        TransportKind::Memory => AlertChannel::new(MemoryTransport::new(broker), channel_config),
        TransportKind::Tcp => {
            tracing::info!(addr = config.broker_addr(), "Using TCP alert broker");
            AlertChannel::new(TcpTransport::new(config.broker_addr()), channel_config)
        }
    };
    Ok(channel)
}

fn build_occupancy_source(
    config: &Config,
    alerts: Option<&AlertChannel>,
) -> Box<dyn OccupancySource> {
    match config.occupancy_kind() {
        OccupancyKind::Synthetic => match config.occupancy_seed() {
            Some(seed) => {
                tracing::info!(seed, "Synthetic occupancy with fixed seed");
                Box::new(SyntheticSource::seeded(seed))
            }
            None => Box::new(SyntheticSource::from_entropy()),
        },
        OccupancyKind::Peers => {
            let source = PeerReportSource::new(config.peer_window());
            match alerts {
                Some(alerts) => Box::new(source.with_inbox(alerts.subscribe(TOPIC_LOCATIONS))),
                None => {
                    tracing::warn!("Peer occupancy needs alerts enabled; counts will stay at zero");
                    Box::new(source)
                }
            }
        }
    }
}
