use chime_app::app::api::routes;
use chime_app::config::ConfigHandler;
use chime_app::monitor_handler::MonitorHandler;
use chime_core::config::load_config;
use chime_core::error::CoreError;
use chime_core::types::UserId;
use chime_db::db::connection::create_lease_manager;
use chime_db::db::lease::LeaseSettings;
use chime_db::db::migrations::run_migrations;
use chime_db::db::query::appointment::LeasedAppointmentSource;
use chime_service::alert::{AlertEvent, AlertMonitor, MonitorSettings, SystemClock};
use salvo::conn::TcpListener;
use salvo::{Listener, Router};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (filter_layer, filter_handle) = reload::Layer::new(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting chime appointment alert service");

    let config = load_config()?;

    tracing::info!(config = ?config, "Configuration loaded");

    if let Ok(filter) = EnvFilter::try_new(config.logging.level.as_str()) {
        if let Err(e) = filter_handle.modify(|current| *current = filter) {
            tracing::warn!(error = %e, "Failed to update log filter from config");
        }
    } else {
        tracing::warn!(level = %config.logging.level, "Invalid log level in config, keeping debug");
    }

    let user = config.alerts.user_id.map(UserId).ok_or_else(|| {
        CoreError::InvalidConfiguration("alerts.user_id is required".to_string())
    })?;

    let database_url = config.database.connection_url();
    run_migrations(&database_url).await?;

    let leases = create_lease_manager(&database_url, LeaseSettings::from(&config.lease))?;

    tracing::info!("Database lease manager created.");

    let monitor = AlertMonitor::spawn(
        LeasedAppointmentSource::new(leases.clone()),
        SystemClock,
        MonitorSettings::new(user, &config.alerts),
    );
    monitor.listeners().add(|event| {
        if let AlertEvent::PollFailed { message } = event {
            tracing::error!(error = %message, "Error checking impending appointments");
        }
    });
    monitor.start()?;

    let bind_addr = config.server.bind_addr();
    let acceptor = TcpListener::new(bind_addr.clone()).bind().await;

    let router = Router::new()
        .hoop(MonitorHandler {
            monitor: monitor.clone(),
        })
        .hoop(ConfigHandler::new(config.clone()))
        .push(routes());

    tracing::info!("Server listening on {bind_addr}");

    let server = salvo::Server::new(acceptor);
    let handle = server.handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown requested");
        handle.stop_graceful(None);
    });
    server.serve(router).await;

    if let Err(e) = monitor.shutdown().await {
        tracing::warn!(error = %e, "Alert monitor was already gone");
    }
    leases.force_close_all().await;

    tracing::info!("Shutdown complete");

    Ok(())
}
