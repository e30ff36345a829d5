//! Application configuration record.
//!
//! Services read this once at `start()`/`restart()` time through the config
//! store; changed values only take effect after an explicit restart. The
//! defaults below double as the recovery value when the on-disk record is
//! missing or corrupt.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub sensor_system: SensorSystemConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralConfig {
    /// Display name used in alert messages.
    pub name: String,
    /// IANA timezone name, e.g. "Europe/Berlin".
    pub timezone: String,
    /// Hour (0-23) at which the day limit window begins.
    pub day_start_hour: u32,
    /// Hour (0-23) at which the night limit window begins. May be lower
    /// than `day_start_hour` for schedules that wrap past midnight.
    pub night_start_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSystemConfig {
    /// Cadence of the polling and watching services.
    pub polling_interval_ms: u64,
    /// Cadence of the logging service.
    pub auto_log_interval_ms: u64,
    /// Maximum number of entries retained in the log history.
    pub log_file_limit: usize,
    /// Rate-limit window length for outbound notifications.
    pub alert_cooldown_ms: u64,
    /// How long live data is considered current. Kept for record
    /// compatibility with the read-side API.
    pub retention_minutes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                name: "Vivarium".to_string(),
                timezone: "Europe/Berlin".to_string(),
                day_start_hour: 8,
                night_start_hour: 20,
            },
            sensor_system: SensorSystemConfig {
                polling_interval_ms: 10_000,
                auto_log_interval_ms: 60_000,
                log_file_limit: 100,
                alert_cooldown_ms: 1_000,
                retention_minutes: 60,
            },
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
