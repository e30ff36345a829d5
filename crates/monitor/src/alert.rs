//! Alert composition and recipient fan-out.
//!
//! The subscriber list is loaded from its store at alert time, never cached
//! here, so registrations made through the external flow take effect on the
//! very next alert.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::config::GeneralConfig;
use crate::notify::NotificationQueue;
use crate::status::{is_day_hour, local_hour};
use crate::store::Stores;
use crate::types::{Limits, Range, Reading, SensorSpec, Status};

/// Compose an alert for `spec` entering `status` and enqueue it for every
/// current subscriber.
pub fn broadcast_alert(
    stores: &Stores,
    queue: &NotificationQueue,
    spec: &SensorSpec,
    status: Status,
    reading: Option<&Reading>,
) -> Result<()> {
    let subscribers = stores.subscribers.load();
    if subscribers.is_empty() {
        debug!(sensor = %spec.id, "no subscribers, skipping alert");
        return Ok(());
    }

    let general = stores.app_config.load().general;
    let hour = local_hour(&general.timezone);
    let text = compose_alert(&general, spec, status, reading, hour);

    for chat_id in subscribers {
        queue.enqueue(chat_id, text.clone());
    }
    Ok(())
}

/// Announce daemon startup to all subscribers.
pub fn broadcast_startup(stores: &Stores, queue: &NotificationQueue) {
    let subscribers = stores.subscribers.load();
    if subscribers.is_empty() {
        return;
    }

    let general = stores.app_config.load().general;
    let text = format!(
        "{} started\ntime: {}\ntimezone: {}",
        general.name,
        now_in_tz(&general.timezone),
        general.timezone,
    );
    for chat_id in subscribers {
        queue.enqueue(chat_id, text.clone());
    }
}

/// Build the alert text. `hour` is the current local hour, used to mark
/// which day/night range applies right now.
pub fn compose_alert(
    general: &GeneralConfig,
    spec: &SensorSpec,
    status: Status,
    reading: Option<&Reading>,
    hour: u32,
) -> String {
    let value = match reading.and_then(|r| r.value) {
        Some(v) => format!("{v}{}", spec.unit),
        None => "n/a".to_string(),
    };

    let limits = match spec.limits {
        Some(Limits::General(range)) => format!("limits: {}", fmt_range(range, &spec.unit)),
        Some(Limits::TimeBased(dn)) => {
            let day_now = is_day_hour(hour, general.day_start_hour, general.night_start_hour);
            format!(
                "limits: day {}{}, night {}{}",
                fmt_range(dn.day, &spec.unit),
                if day_now { " (current)" } else { "" },
                fmt_range(dn.night, &spec.unit),
                if day_now { "" } else { " (current)" },
            )
        }
        None => "limits: none configured".to_string(),
    };

    let time = reading
        .map(|r| millis_in_tz(r.timestamp, &general.timezone))
        .unwrap_or_else(|| "n/a".to_string());

    format!(
        "ALERT: {} ({})\nstatus: {}\nvalue: {}\n{}\ntime: {}\nid: {}  type: {}",
        spec.name,
        general.name,
        status.to_string().to_uppercase(),
        value,
        limits,
        time,
        spec.id,
        spec.kind,
    )
}

fn fmt_range(range: Range, unit: &str) -> String {
    let lo = range
        .min
        .map(|v| format!("{v}{unit}"))
        .unwrap_or_else(|| "-∞".to_string());
    let hi = range
        .max
        .map(|v| format!("{v}{unit}"))
        .unwrap_or_else(|| "+∞".to_string());
    format!("{lo} – {hi}")
}

fn parse_tz(timezone: &str) -> Tz {
    timezone.parse().unwrap_or(Tz::UTC)
}

fn millis_in_tz(millis: i64, timezone: &str) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt
            .with_timezone(&parse_tz(timezone))
            .format("%H:%M")
            .to_string(),
        None => "n/a".to_string(),
    }
}

fn now_in_tz(timezone: &str) -> String {
    Utc::now()
        .with_timezone(&parse_tz(timezone))
        .format("%H:%M")
        .to_string()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{AlertChannel, NotificationQueue};
    use crate::types::{DayNight, SensorType};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn general() -> GeneralConfig {
        GeneralConfig {
            name: "Vivarium".into(),
            timezone: "UTC".into(),
            day_start_hour: 8,
            night_start_hour: 20,
        }
    }

    fn temp_spec(limits: Option<Limits>) -> SensorSpec {
        SensorSpec {
            id: "t1".into(),
            name: "Basking spot".into(),
            kind: SensorType::Temperature,
            unit: "°C".into(),
            active: None,
            hardware: None,
            limits,
        }
    }

    fn reading(value: Option<f64>) -> Reading {
        Reading {
            name: "Basking spot".into(),
            kind: SensorType::Temperature,
            unit: "°C".into(),
            value,
            timestamp: 1_700_000_000_000,
        }
    }

    // -- Composition -------------------------------------------------------

    #[test]
    fn alert_text_carries_identity_and_status() {
        let s = temp_spec(Some(Limits::General(Range {
            min: Some(24.0),
            max: Some(34.0),
        })));
        let r = reading(Some(35.2));
        let text = compose_alert(&general(), &s, Status::Warning, Some(&r), 12);

        assert!(text.contains("Basking spot"));
        assert!(text.contains("WARNING"));
        assert!(text.contains("35.2°C"));
        assert!(text.contains("24°C – 34°C"));
        assert!(text.contains("id: t1"));
    }

    #[test]
    fn null_value_renders_as_na() {
        let s = temp_spec(None);
        let r = reading(None);
        let text = compose_alert(&general(), &s, Status::Unknown, Some(&r), 12);
        assert!(text.contains("value: n/a"));
        assert!(text.contains("limits: none configured"));
    }

    #[test]
    fn absent_bounds_render_as_infinities() {
        let s = temp_spec(Some(Limits::General(Range {
            min: Some(20.0),
            max: None,
        })));
        let text = compose_alert(&general(), &s, Status::Warning, Some(&reading(Some(5.0))), 12);
        assert!(text.contains("20°C – +∞"));
    }

    #[test]
    fn day_night_marks_current_window() {
        let s = temp_spec(Some(Limits::TimeBased(DayNight {
            day: Range {
                min: Some(28.0),
                max: Some(34.0),
            },
            night: Range {
                min: Some(22.0),
                max: Some(26.0),
            },
        })));

        let day_text = compose_alert(&general(), &s, Status::Warning, Some(&reading(Some(20.0))), 10);
        assert!(day_text.contains("day 28°C – 34°C (current)"));

        let night_text =
            compose_alert(&general(), &s, Status::Warning, Some(&reading(Some(20.0))), 22);
        assert!(night_text.contains("night 22°C – 26°C (current)"));
    }

    // -- Fan-out -----------------------------------------------------------

    struct RecordingChannel {
        sent: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        async fn send(&self, recipient: i64, _text: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(recipient);
            Ok(())
        }
    }

    #[tokio::test]
    async fn broadcast_fans_out_to_all_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::new(dir.path());
        stores.subscribers.save(&vec![100, 200, 300]).unwrap();

        let ch = Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
        });
        let q = NotificationQueue::new(ch.clone(), Duration::from_millis(5), 10);

        let s = temp_spec(None);
        broadcast_alert(&stores, &q, &s, Status::Warning, Some(&reading(Some(40.0)))).unwrap();

        for _ in 0..200 {
            if ch.sent.lock().unwrap().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*ch.sent.lock().unwrap(), vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::new(dir.path());

        let ch = Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
        });
        let q = NotificationQueue::new(ch.clone(), Duration::from_millis(5), 10);

        let s = temp_spec(None);
        broadcast_alert(&stores, &q, &s, Status::Warning, None).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ch.sent.lock().unwrap().is_empty());
    }
}
