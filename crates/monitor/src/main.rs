mod alert;
mod bme280;
mod config;
mod dht;
mod logger;
mod notify;
mod poll;
mod reader;
mod status;
mod store;
mod types;
mod watcher;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use logger::LoggingService;
use notify::{LogChannel, NotificationQueue};
use poll::PollingService;
use store::Stores;
use watcher::WatchingService;

/// Upper bound on alert sends per cooldown window, across all subscribers.
const MAX_ALERTS_PER_WINDOW: u32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    info!(%data_dir, "starting monitor");

    let stores = Arc::new(Stores::new(&data_dir));
    let app_config = stores.app_config.load();
    info!(
        name = %app_config.general.name,
        timezone = %app_config.general.timezone,
        "configuration loaded"
    );

    let queue = Arc::new(NotificationQueue::new(
        Arc::new(LogChannel),
        Duration::from_millis(app_config.sensor_system.alert_cooldown_ms),
        MAX_ALERTS_PER_WINDOW,
    ));

    alert::broadcast_startup(&stores, &queue);

    let mut polling = PollingService::new(Arc::clone(&stores), None);
    let mut logging = LoggingService::new(Arc::clone(&stores));
    let mut watching = WatchingService::new(Arc::clone(&stores), Arc::clone(&queue));

    polling.start();
    logging.start();
    watching.start();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    watching.stop();
    logging.stop();
    polling.stop();

    Ok(())
}
