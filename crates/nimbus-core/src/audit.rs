//! Audit event log — every state transition in the task framework and the
//! schedule runner records an action with structured fields.
//!
//! The log is append-only from the core's point of view; shipping events to
//! an external store is a collaborator concern behind the `AuditLog` trait.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One recorded event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: String,
    pub fields: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Sink for structured audit events.
pub trait AuditLog: Send + Sync {
    fn record_event(&self, action: &str, fields: serde_json::Value);
}

/// In-memory ring buffer of recent events, capped at `capacity`.
pub struct MemoryAuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl MemoryAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Snapshot of recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .expect("audit lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Events matching an action name, oldest first.
    pub fn events_for(&self, action: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new(256)
    }
}

impl AuditLog for MemoryAuditLog {
    fn record_event(&self, action: &str, fields: serde_json::Value) {
        tracing::debug!("📋 audit: {} {}", action, fields);
        let mut events = self.events.lock().expect("audit lock poisoned");
        events.push_back(AuditEvent {
            action: action.to_string(),
            fields,
            timestamp: Utc::now(),
        });
        // Ring buffer — keep the newest `capacity` entries
        while events.len() > self.capacity {
            events.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_filter() {
        let log = MemoryAuditLog::new(16);
        log.record_event("schedule_started", serde_json::json!({"schedule_id": "s1"}));
        log.record_event("schedule_finished", serde_json::json!({"schedule_id": "s1"}));
        log.record_event("schedule_started", serde_json::json!({"schedule_id": "s2"}));

        assert_eq!(log.events().len(), 3);
        assert_eq!(log.events_for("schedule_started").len(), 2);
        assert_eq!(log.events_for("schedule_finished")[0].fields["schedule_id"], "s1");
    }

    #[test]
    fn test_ring_buffer_caps() {
        let log = MemoryAuditLog::new(4);
        for i in 0..10 {
            log.record_event("tick", serde_json::json!({ "i": i }));
        }
        let events = log.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].fields["i"], 6);
    }
}
