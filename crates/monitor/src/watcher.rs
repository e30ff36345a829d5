//! Sensor watching service: tracks the last known status per sensor and
//! fires an alert exactly once per transition into a non-nominal status.
//!
//! Edge-triggered by design: a sensor stuck in `warning` across many cycles
//! produces one alert, not one per cycle. Recoveries back to `ok` update
//! the tracking map silently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alert::broadcast_alert;
use crate::notify::NotificationQueue;
use crate::status::evaluate;
use crate::store::Stores;
use crate::types::Status;

struct Worker {
    stop: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

pub struct WatchingService {
    stores: Arc<Stores>,
    queue: Arc<NotificationQueue>,
    worker: Option<Worker>,
}

impl WatchingService {
    pub fn new(stores: Arc<Stores>, queue: Arc<NotificationQueue>) -> Self {
        Self {
            stores,
            queue,
            worker: None,
        }
    }

    /// Start the watch loop on the polling cadence (own timer, read once
    /// now). The first check runs immediately. No-op when already running.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            warn!("sensor watching is already running");
            return;
        }

        let interval_ms = self
            .stores
            .app_config
            .load()
            .sensor_system
            .polling_interval_ms;
        let interval = Duration::from_millis(interval_ms);
        info!(interval_ms, "starting sensor watching");

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let stores = Arc::clone(&self.stores);
        let queue = Arc::clone(&self.queue);

        let handle = tokio::spawn(async move {
            // Unseen sensors start at `ok`; the map resets on restart.
            let mut last_status: HashMap<String, Status> = HashMap::new();
            loop {
                run_cycle(&stores, &queue, &mut last_status);
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("sensor watching worker exited");
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
                info!("stopped sensor watching");
            }
            None => warn!("sensor watching is not running"),
        }
    }

    /// Stop and start again, re-reading the configuration and resetting the
    /// per-sensor status tracking.
    pub fn restart(&mut self) {
        self.stop();
        self.start();
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

/// One watch cycle: evaluate every active sensor fresh and alert on
/// transitions into a non-ok status. A failed alert is logged and does not
/// abort the remaining sensors.
fn run_cycle(stores: &Stores, queue: &NotificationQueue, last_status: &mut HashMap<String, Status>) {
    let sensors = stores.sensors.load().sensors;
    let live = stores.live.load();
    let general = stores.app_config.load().general;

    for spec in sensors.iter().filter(|s| s.is_active()) {
        let reading = live.get(&spec.id);
        let status = evaluate(spec, reading, &general);

        let Some(prev) = note_transition(last_status, &spec.id, status) else {
            continue;
        };

        if status == Status::Ok {
            info!(sensor = %spec.id, "recovered ({prev} -> ok)");
            continue;
        }

        warn!(sensor = %spec.id, "status change {prev} -> {status}, alerting");
        if let Err(e) = broadcast_alert(stores, queue, spec, status, reading) {
            error!(sensor = %spec.id, "failed to send alert: {e}");
        }
    }
}

/// Record `next` for `id`; returns the previous status when it changed,
/// `None` when the status is unchanged. Unseen sensors default to `ok`.
fn note_transition(
    last_status: &mut HashMap<String, Status>,
    id: &str,
    next: Status,
) -> Option<Status> {
    let prev = last_status.get(id).copied().unwrap_or(Status::Ok);
    if next == prev {
        return None;
    }
    last_status.insert(id.to_string(), next);
    Some(prev)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::AlertChannel;
    use crate::types::{
        Limits, LiveSnapshot, Range, Reading, SensorList, SensorSpec, SensorType,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    // -- Edge triggering ---------------------------------------------------

    #[test]
    fn alerts_fire_exactly_once_per_transition() {
        let mut last = HashMap::new();
        let sequence = [
            Status::Ok,
            Status::Ok,
            Status::Warning,
            Status::Warning,
            Status::Ok,
            Status::Warning,
        ];

        let mut alert_indices = Vec::new();
        for (i, status) in sequence.into_iter().enumerate() {
            if note_transition(&mut last, "s1", status).is_some() && status != Status::Ok {
                alert_indices.push(i);
            }
        }

        assert_eq!(alert_indices, vec![2, 5]);
    }

    #[test]
    fn unseen_sensor_defaults_to_ok() {
        let mut last = HashMap::new();
        // First observation already ok: no transition.
        assert!(note_transition(&mut last, "s1", Status::Ok).is_none());
        // First observation in warning: transition from the implicit ok.
        assert_eq!(
            note_transition(&mut last, "s2", Status::Warning),
            Some(Status::Ok)
        );
    }

    #[test]
    fn warning_to_unknown_is_a_transition() {
        let mut last = HashMap::new();
        note_transition(&mut last, "s1", Status::Warning);
        assert_eq!(
            note_transition(&mut last, "s1", Status::Unknown),
            Some(Status::Warning)
        );
    }

    #[test]
    fn recovery_is_recorded_without_alert() {
        let mut last = HashMap::new();
        note_transition(&mut last, "s1", Status::Warning);

        let prev = note_transition(&mut last, "s1", Status::Ok);
        assert_eq!(prev, Some(Status::Warning));
        assert_eq!(last["s1"], Status::Ok);
    }

    // -- Full cycle --------------------------------------------------------

    struct RecordingChannel {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        async fn send(&self, recipient: i64, text: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((recipient, text.to_string()));
            Ok(())
        }
    }

    fn overheating_setup(dir: &std::path::Path) -> Arc<Stores> {
        let stores = Stores::new(dir);
        stores
            .sensors
            .save(&SensorList {
                sensors: vec![SensorSpec {
                    id: "t1".into(),
                    name: "Basking spot".into(),
                    kind: SensorType::Temperature,
                    unit: "°C".into(),
                    active: None,
                    hardware: None,
                    limits: Some(Limits::General(Range {
                        min: Some(20.0),
                        max: Some(30.0),
                    })),
                }],
            })
            .unwrap();
        stores.subscribers.save(&vec![99]).unwrap();

        let mut live = LiveSnapshot::new();
        live.insert(
            "t1".into(),
            Reading {
                name: "Basking spot".into(),
                kind: SensorType::Temperature,
                unit: "°C".into(),
                value: Some(40.0),
                timestamp: 1_700_000_000_000,
            },
        );
        stores.live.save(&live).unwrap();
        Arc::new(stores)
    }

    #[tokio::test]
    async fn cycle_alerts_once_for_sustained_warning() {
        let dir = tempfile::tempdir().unwrap();
        let stores = overheating_setup(dir.path());

        let ch = Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
        });
        let queue = Arc::new(NotificationQueue::new(
            ch.clone(),
            Duration::from_millis(5),
            10,
        ));

        let mut last = HashMap::new();
        // Three cycles with the sensor stuck above max.
        run_cycle(&stores, &queue, &mut last);
        run_cycle(&stores, &queue, &mut last);
        run_cycle(&stores, &queue, &mut last);

        for _ in 0..100 {
            if !ch.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Extra settle so duplicate alerts would have surfaced.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent = ch.sent.lock().unwrap();
        assert_eq!(sent.len(), 1, "expected exactly one alert, got {sent:?}");
        assert_eq!(sent[0].0, 99);
        assert!(sent[0].1.contains("WARNING"));
    }

    #[tokio::test]
    async fn missing_reading_goes_unknown_and_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let stores = overheating_setup(dir.path());
        // Empty the live store: sensor has no reading at all.
        stores.live.save(&LiveSnapshot::new()).unwrap();

        let ch = Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
        });
        let queue = Arc::new(NotificationQueue::new(
            ch.clone(),
            Duration::from_millis(5),
            10,
        ));

        let mut last = HashMap::new();
        run_cycle(&stores, &queue, &mut last);
        assert_eq!(last["t1"], Status::Unknown);

        for _ in 0..100 {
            if !ch.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ch.sent.lock().unwrap()[0].1.contains("UNKNOWN"));
    }

    #[tokio::test]
    async fn inactive_sensors_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let stores = overheating_setup(dir.path());
        let mut list = stores.sensors.load();
        list.sensors[0].active = Some(false);
        stores.sensors.save(&list).unwrap();

        let ch = Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
        });
        let queue = Arc::new(NotificationQueue::new(
            ch.clone(),
            Duration::from_millis(5),
            10,
        ));

        let mut last = HashMap::new();
        run_cycle(&stores, &queue, &mut last);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(last.is_empty());
        assert!(ch.sent.lock().unwrap().is_empty());
    }

    // -- Lifecycle ---------------------------------------------------------

    #[tokio::test]
    async fn start_stop_restart_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let stores = overheating_setup(dir.path());
        let ch = Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
        });
        let queue = Arc::new(NotificationQueue::new(
            ch,
            Duration::from_millis(5),
            10,
        ));

        let mut svc = WatchingService::new(stores, queue);
        svc.start();
        assert!(svc.is_running());
        svc.start();
        assert!(svc.is_running());
        svc.stop();
        assert!(!svc.is_running());
        svc.restart();
        assert!(svc.is_running());
        svc.stop();
    }
}
