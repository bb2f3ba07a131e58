//! Structured security-event emission for operator-facing audit trails.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};

/// Request-scoped client attribution, resolved once per request by the web
/// layer and passed down by value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// One security-relevant occurrence: failed login, login, logout, or any
/// caller-defined event type.
#[derive(Clone, Debug, Serialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub details: String,
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Destination for security events; the observability pipeline lives behind
/// this seam.
pub trait EventSink: Send + Sync {
    /// Record one event.
    ///
    /// # Errors
    /// May fail for remote sinks; [`SecurityLogger`] swallows the failure.
    fn record(&self, event: &SecurityEvent) -> Result<()>;
}

/// Default sink: structured `tracing` records under the `security` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &SecurityEvent) -> Result<()> {
        info!(
            target: "security",
            event_type = %event.event_type,
            details = %event.details,
            user_id = ?event.user_id,
            ip_address = ?event.ip_address,
            user_agent = ?event.user_agent,
            timestamp = %event.timestamp,
            "security event"
        );
        Ok(())
    }
}

/// Test-friendly sink that keeps every event in memory.
#[derive(Default)]
pub struct CollectingSink {
    events: parking_lot::Mutex<Vec<SecurityEvent>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for CollectingSink {
    fn record(&self, event: &SecurityEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Emits security events; a sink failure never reaches the caller.
pub struct SecurityLogger {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl SecurityLogger {
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_clock(sink, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Capture timestamp and client attribution and hand the event to the
    /// sink. Failures are logged for operators and otherwise swallowed so
    /// request handling is never disturbed by observability problems.
    pub fn log(&self, event_type: &str, details: &str, user_id: Option<i64>, client: &ClientInfo) {
        let event = SecurityEvent {
            timestamp: self.clock.now(),
            event_type: event_type.to_string(),
            details: details.to_string(),
            user_id,
            ip_address: client.ip.clone(),
            user_agent: client.user_agent.clone(),
        };
        if let Err(err) = self.sink.record(&event) {
            error!("Failed to record security event {event_type}: {err}");
        }
    }
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}
