use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::ConnectionState;

// Outbound records. Every one of them carries the status at send time.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateCheck {
    pub device_id: String,
    pub ip: String,
    pub timestamp: i64,
    pub status: ConnectionState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Ack {
    pub device_id: String,
    pub success: bool,
    pub message: String,
    pub timestamp: i64,
    pub status: ConnectionState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub device_id: String,
    pub ip: String,
    pub rssi: i32,
    pub uptime: u64,
    pub free_heap: u64,
    pub timestamp: i64,
    pub status: ConnectionState,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogLine {
    pub device_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: i64,
    pub status: ConnectionState,
}

// Inbound records.

/// Control-plane answer to an update check. The field is optional on the
/// wire; the updater decides what an absent or placeholder value means.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct FirmwareLocation {
    #[serde(default)]
    pub firmware_url: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CommandPayload {
    pub command: String,
}

/// Point-in-time view of the device, rebuilt on every heartbeat.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub device_id: String,
    pub link_address: String,
    pub signal_level: i32,
    pub free_memory: u64,
    pub uptime_ms: u64,
    pub state: ConnectionState,
    pub timestamp: DateTime<Utc>,
}

impl From<TelemetrySnapshot> for Heartbeat {
    fn from(snapshot: TelemetrySnapshot) -> Self {
        Heartbeat {
            device_id: snapshot.device_id,
            ip: snapshot.link_address,
            rssi: snapshot.signal_level,
            uptime: snapshot.uptime_ms,
            free_heap: snapshot.free_memory,
            timestamp: snapshot.timestamp.timestamp_millis(),
            status: snapshot.state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub source_location: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub succeeded: bool,
    pub detail: String,
    pub bytes_written: u64,
    pub bytes_expected: u64,
}
