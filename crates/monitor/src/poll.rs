//! Sensor polling service: reads all active sensors on a recurring cycle,
//! persists the live snapshot and notifies an optional broadcast hook.
//!
//! The cycle is self-rescheduling — the next one is armed only after the
//! current one finishes — so there is never more than one snapshot writer,
//! even when a hardware read is slow. `stop()` keeps an in-progress cycle
//! running to completion but prevents the next scheduled one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::reader::Reader;
use crate::store::Stores;
use crate::types::LiveSnapshot;

/// Hook invoked with each completed snapshot (e.g. a live websocket feed).
pub type Broadcast = Arc<dyn Fn(&LiveSnapshot) + Send + Sync>;

struct Worker {
    stop: watch::Sender<bool>,
    // Kept so the task is tied to the service's lifetime; never awaited.
    _handle: JoinHandle<()>,
}

pub struct PollingService {
    stores: Arc<Stores>,
    broadcast: Option<Broadcast>,
    worker: Option<Worker>,
}

impl PollingService {
    pub fn new(stores: Arc<Stores>, broadcast: Option<Broadcast>) -> Self {
        Self {
            stores,
            broadcast,
            worker: None,
        }
    }

    /// Start the polling loop. Reads the cadence from the config store now;
    /// later config changes require a restart. No-op when already running.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            warn!("sensor polling is already running");
            return;
        }

        let interval_ms = self
            .stores
            .app_config
            .load()
            .sensor_system
            .polling_interval_ms;
        let interval = Duration::from_millis(interval_ms);
        info!(interval_ms, "starting sensor polling");

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let stores = Arc::clone(&self.stores);
        let broadcast = self.broadcast.clone();

        let handle = tokio::spawn(async move {
            // Reader instances are cached per sensor id for the lifetime of
            // this worker; a restart rebuilds them from fresh specs.
            let mut readers: HashMap<String, Reader> = HashMap::new();
            loop {
                run_cycle(&stores, &mut readers, broadcast.as_ref());
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("sensor polling worker exited");
        });

        self.worker = Some(Worker {
            stop: stop_tx,
            _handle: handle,
        });
    }

    /// Stop the loop. Idempotent; an in-progress cycle finishes first.
    pub fn stop(&mut self) {
        match self.worker.take() {
            Some(worker) => {
                let _ = worker.stop.send(true);
                info!("stopped sensor polling");
            }
            None => warn!("sensor polling is not running"),
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

/// One poll cycle: read every active sensor through its cached reader,
/// persist the snapshot as a whole-file overwrite, then broadcast.
fn run_cycle(stores: &Stores, readers: &mut HashMap<String, Reader>, broadcast: Option<&Broadcast>) {
    let sensors = stores.sensors.load().sensors;
    let mut snapshot = LiveSnapshot::new();

    for spec in sensors.iter().filter(|s| s.is_active()) {
        debug!(sensor = %spec.id, "reading sensor");
        let reader = readers
            .entry(spec.id.clone())
            .or_insert_with(|| Reader::for_spec(spec));

        // Failed reads come back null-valued; those are excluded so the
        // snapshot only ever carries real measurements. The sensor still
        // shows up in listings (status: unknown) via its spec.
        let reading = reader.read(spec);
        match reading.value {
            Some(_) => {
                snapshot.insert(spec.id.clone(), reading);
            }
            None => warn!(sensor = %spec.id, "no value from sensor, excluded from snapshot"),
        }
    }

    if let Err(e) = stores.live.save(&snapshot) {
        error!("failed to persist live snapshot: {e}");
        return;
    }

    if let Some(hook) = broadcast {
        hook(&snapshot);
    }

    debug!(count = snapshot.len(), "poll cycle complete");
}

// ===========================================================================
// Tests
// ===========================================================================
