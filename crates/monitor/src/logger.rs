//! Sensor logging service: periodically snapshots the live store into an
//! append-only, size-bounded history.
//!
//! Unlike polling, the first entry is written only after one full interval;
//! logging the boot-time (usually empty) live store has no value.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::store::Stores;
use crate::types::LogEntry;

struct Worker {
    stop: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

pub struct LoggingService {
    stores: Arc<Stores>,
    worker: Option<Worker>,
}

impl LoggingService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self {
            stores,
            worker: None,
        }
    }

    /// Start the logging loop; cadence and history bound come from the
    /// config store, read once now. No-op when already running.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            warn!("sensor logging is already running");
            return;
        }

        let cfg = self.stores.app_config.load().sensor_system;
        let interval = Duration::from_millis(cfg.auto_log_interval_ms);
        let limit = cfg.log_file_limit;
        info!(
            interval_ms = cfg.auto_log_interval_ms,
            limit, "starting sensor logging"
        );

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let stores = Arc::clone(&self.stores);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                run_cycle(&stores, limit);
            }
            debug!("sensor logging worker exited");
        });

        self.worker = Some(Worker {
            stop: stop_tx,
            _handle: handle,
        });
    }

    /// Stop the loop. Idempotent.
    pub fn stop(&mut self) {
        match self.worker.take() {
            Some(worker) => {
                let _ = worker.stop.send(true);
                info!("stopped sensor logging");
            }
            None => warn!("sensor logging is not running"),
        }
    }

    /// Stop and start again, re-reading the configuration.
    pub fn restart(&mut self) {
        self.stop();
        self.start();
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

/// Append one history entry and evict the oldest beyond `limit`.
fn run_cycle(stores: &Stores, limit: usize) {
    let readings = stores.live.load();
    let mut logs = stores.logs.load();

    logs.push(LogEntry {
        timestamp: Utc::now().timestamp_millis(),
        readings,
    });

    if logs.len() > limit {
        let excess = logs.len() - limit;
        logs.drain(..excess);
    }

    if let Err(e) = stores.logs.save(&logs) {
        error!("failed to persist sensor logs: {e}");
        return;
    }
    debug!(entries = logs.len(), "log cycle complete");
}

// ===========================================================================
// Tests
// ===========================================================================
