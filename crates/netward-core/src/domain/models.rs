//! Sensor-side entities as they appear in REST pages and stream payloads.
//!
//! All types use camelCase field names on the wire.  Optional fields default
//! when absent so that older sensor firmware remains readable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Devices ───────────────────────────────────────────────────────────────────

/// A host observed on the monitored network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    /// Name to show a user: the assigned name, else the IP, else the id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.ip.as_deref())
            .unwrap_or(&self.id)
    }
}

// ── Alerts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// A security alert.
///
/// Sensor-issued alerts have positive ids.  Alerts generated by the client
/// itself (for example "sensor unreachable") use strictly negative ids so
/// they can never collide with the sensor's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alert {
    /// Builds the client-side alert raised when the sensor has been
    /// unreachable for too long.
    pub fn sensor_unreachable(id: i64, minutes: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            severity: Severity::High,
            title: "Sensor unreachable".to_string(),
            message: format!("No connection to the sensor for {minutes} minutes"),
            device_id: None,
            created_at: now,
            acknowledged: false,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.id < 0
    }
}

// ── Decoys ────────────────────────────────────────────────────────────────────

/// A decoy service run by the sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decoy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interactions: u64,
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Sensor health summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    #[serde(default)]
    pub sensor_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub uptime_secs: u64,
    #[serde(default)]
    pub device_count: u64,
    #[serde(default)]
    pub alert_count: u64,
    /// Highest stream sequence number the sensor has emitted.
    #[serde(default)]
    pub last_event_seq: Option<u64>,
}

/// Progress of the sensor's baseline learning period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStatus {
    #[serde(default)]
    pub active: bool,
    /// Fraction complete in `0.0..=1.0`.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl LearningStatus {
    /// Learning is running and not yet complete.
    pub fn is_active(&self) -> bool {
        self.active && self.progress < 1.0
    }
}

// ── Pagination ────────────────────────────────────────────────────────────────

/// One page of a paginated collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}
