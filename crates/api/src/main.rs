use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fleetwatch_core::clock::{system_clock, SharedClock};
use fleetwatch_core::config::MonitorConfig;
use fleetwatch_core::notification::NotificationConfig;
use fleetwatch_db::SharedStore;
use fleetwatch_events::{
    AlertBus, ChatWebhookProvider, EmailConfig, EmailProvider, GatewayProvider, InAppProvider,
    NotificationDispatcher,
};
use fleetwatch_monitor::{Orchestrator, StaticAccountRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetwatch_api::config::ServerConfig;
use fleetwatch_api::router::build_app_router;
use fleetwatch_api::state::AppState;
use fleetwatch_api::store::open_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    let monitor_config = MonitorConfig::from_env()?;

    // --- Document store ---
    let database_url = std::env::var("DATABASE_URL").ok();
    let store = open_store(database_url.as_deref()).await?;

    // --- Alert delivery ---
    let clock = system_clock();
    let bus = Arc::new(AlertBus::default());
    let dispatcher = build_dispatcher(
        monitor_config.notifications.clone(),
        clock.clone(),
        store.clone(),
        Arc::clone(&bus),
    )?;
    tracing::info!(channels = ?dispatcher.registered_channels(), "Notification dispatcher ready");

    // --- Monitor ---
    let registry = Arc::new(StaticAccountRegistry::from_env());
    let orchestrator = Orchestrator::new(
        monitor_config,
        registry,
        dispatcher,
        Some(store.clone()),
        clock,
    )?;
    orchestrator.restore().await;
    orchestrator.start();

    // --- Router ---
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        store: Some(store),
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config)?;

    // --- Start server ---
    let ip = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address: {}", config.host))?;
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping monitor");
    if tokio::time::timeout(
        Duration::from_secs(config.shutdown_timeout_secs),
        orchestrator.stop(),
    )
    .await
    .is_err()
    {
        tracing::warn!("Monitor did not stop within the shutdown timeout");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Install the tracing subscriber. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "fleetwatch_api=debug,fleetwatch_monitor=info,fleetwatch_events=info,tower_http=debug"
            .into()
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Register a provider for every channel whose settings are present. In-app
/// delivery is always available.
fn build_dispatcher(
    config: NotificationConfig,
    clock: SharedClock,
    store: SharedStore,
    bus: Arc<AlertBus>,
) -> anyhow::Result<Arc<NotificationDispatcher>> {
    let mut dispatcher = NotificationDispatcher::new(config, clock)
        .with_store(store)
        .with_provider(Arc::new(InAppProvider::new(bus)));

    if let Some(chat) = ChatWebhookProvider::from_env()? {
        dispatcher = dispatcher.with_provider(Arc::new(chat));
    }
    if let Some(email) = EmailConfig::from_env() {
        dispatcher = dispatcher.with_provider(Arc::new(EmailProvider::new(email)?));
    }
    for gateway in GatewayProvider::from_env()? {
        dispatcher = dispatcher.with_provider(Arc::new(gateway));
    }
    Ok(Arc::new(dispatcher))
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
