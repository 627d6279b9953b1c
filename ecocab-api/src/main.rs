use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Duration;
use ecocab_api::{app, AppState};
use ecocab_dispatch::{DispatchEngine, ExpirySweeper, RideLifecycle};
use ecocab_domain::{Clock, DeviceRegistry, RideStore, SystemClock};
use ecocab_store::{DbClient, PgDeviceRegistry, PgRideStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ecocab_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ecocab_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting EcoCab API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let registry: Arc<dyn DeviceRegistry> = Arc::new(PgDeviceRegistry::new(db.pool.clone()));
    let rides: Arc<dyn RideStore> = Arc::new(PgRideStore::new(db.pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let window = Duration::seconds(config.dispatch.reservation_window_secs as i64);
    let engine = Arc::new(DispatchEngine::new(
        registry.clone(),
        rides.clone(),
        clock.clone(),
        window,
    ));
    let lifecycle = Arc::new(RideLifecycle::new(
        rides.clone(),
        registry.clone(),
        engine.clone(),
        clock.clone(),
    ));
    let sweeper = Arc::new(ExpirySweeper::new(
        rides.clone(),
        engine.clone(),
        clock.clone(),
    ));

    tokio::spawn(ecocab_api::worker::start_expiry_worker(
        sweeper,
        std::time::Duration::from_secs(config.dispatch.sweep_interval_secs),
    ));

    let app_state = AppState {
        registry,
        rides,
        engine,
        lifecycle,
        clock,
        rules: config.dispatch.clone(),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}
