//! Outbound records: update checks, acks, heartbeats and log lines.
//!
//! Publishing never fails the caller. With the session down a record is
//! dropped with a debug line; a client-side rejection is logged as a warning.
//! Log lines sent through [`TelemetryPublisher::log_or_hold`] are the
//! exception: they wait for the next session instead.

use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::status::ConnectionState;
use crate::topics::Topics;
use crate::transport::Transport;
use crate::types::{Ack, Heartbeat, LogLevel, LogLine, TelemetrySnapshot, UpdateCheck};

/// Log lines kept while no session exists. Oldest are dropped first.
const HELD_LOG_CAPACITY: usize = 16;

pub struct TelemetryPublisher {
    topics: Arc<Topics>,
    held: VecDeque<LogLine>,
}

impl TelemetryPublisher {
    pub fn new(topics: Arc<Topics>) -> Self {
        Self {
            topics,
            held: VecDeque::new(),
        }
    }

    pub async fn update_check<T: Transport>(
        &self,
        transport: &mut T,
        ip: &str,
        status: ConnectionState,
    ) -> bool {
        let record = UpdateCheck {
            device_id: self.topics.device_id().to_string(),
            ip: ip.to_string(),
            timestamp: now_millis(),
            status,
        };
        self.emit(transport, &self.topics.request, &record).await
    }

    pub async fn ack<T: Transport>(
        &self,
        transport: &mut T,
        success: bool,
        message: &str,
        status: ConnectionState,
    ) -> bool {
        let record = Ack {
            device_id: self.topics.device_id().to_string(),
            success,
            message: message.to_string(),
            timestamp: now_millis(),
            status,
        };
        self.emit(transport, &self.topics.ack, &record).await
    }

    pub async fn heartbeat<T: Transport>(
        &self,
        transport: &mut T,
        snapshot: TelemetrySnapshot,
    ) -> bool {
        let record = Heartbeat::from(snapshot);
        self.emit(transport, &self.topics.status, &record).await
    }

    /// Publishes a log line and mirrors it to the local subscriber.
    pub async fn log<T: Transport>(
        &self,
        transport: &mut T,
        level: LogLevel,
        message: &str,
        status: ConnectionState,
    ) -> bool {
        let record = self.log_record(level, message, status);
        self.emit(transport, &self.topics.logs, &record).await
    }

    /// Like [`TelemetryPublisher::log`], but with the session down the line is
    /// kept for [`TelemetryPublisher::release_held`] instead of dropped.
    pub async fn log_or_hold<T: Transport>(
        &mut self,
        transport: &mut T,
        level: LogLevel,
        message: &str,
        status: ConnectionState,
    ) -> bool {
        let record = self.log_record(level, message, status);
        if transport.connected() {
            return self.emit(transport, &self.topics.logs, &record).await;
        }
        if self.held.len() == HELD_LOG_CAPACITY {
            self.held.pop_front();
        }
        debug!(held = self.held.len() + 1, "Session down, log line held");
        self.held.push_back(record);
        false
    }

    /// Sends held log lines in the order they were raised. Returns how many
    /// went out; lines that fail to send are dropped.
    pub async fn release_held<T: Transport>(&mut self, transport: &mut T) -> usize {
        let mut sent = 0;
        while let Some(record) = self.held.pop_front() {
            if self.emit(transport, &self.topics.logs, &record).await {
                sent += 1;
            }
        }
        sent
    }

    fn log_record(&self, level: LogLevel, message: &str, status: ConnectionState) -> LogLine {
        match level {
            LogLevel::Info => info!(status = %status, "{}", message),
            LogLevel::Error => error!(status = %status, "{}", message),
        }
        LogLine {
            device_id: self.topics.device_id().to_string(),
            level,
            message: message.to_string(),
            timestamp: now_millis(),
            status,
        }
    }

    async fn emit<T: Transport, R: Serialize>(
        &self,
        transport: &mut T,
        topic: &str,
        record: &R,
    ) -> bool {
        if !transport.connected() {
            debug!(topic, "Session down, record dropped");
            return false;
        }
        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, error = %e, "Failed to encode record");
                return false;
            }
        };
        match transport.publish(topic, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(topic, error = %e, "Publish failed");
                false
            }
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
