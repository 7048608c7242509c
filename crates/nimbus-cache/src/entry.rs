//! Cache data model: fingerprints, result entries, error markers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deterministic key for one logical unit of work, derived from the task
/// key, the owning tenant and the task arguments. Order-sensitive: the key
/// is the canonical JSON encoding of `[task_key, owner_id, args]`, so two
/// invocations with identical fingerprints are the same unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(task_key: &str, owner_id: &str, args: &serde_json::Value) -> Self {
        Fingerprint(serde_json::json!([task_key, owner_id, args]).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last successful result for a fingerprint. Replaced whole on every
/// successful completion, never partially updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Opaque result payload.
    pub payload: serde_json::Value,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Sequence id of the chain that produced this result.
    pub seq_id: String,
}

impl CacheEntry {
    pub fn new(payload: serde_json::Value, seq_id: &str) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
            seq_id: seq_id.to_string(),
        }
    }

    /// Age of this entry. Saturates at zero for clock skew.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Failure bookkeeping for one fingerprint: the sequence id of the failing
/// chain and the ordered timestamps of its consecutive failures. Created on
/// first failure, appended to on each subsequent failure, cleared on the
/// next success or when a newer sequence takes over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub seq_id: String,
    pub timestamps: Vec<DateTime<Utc>>,
}

impl ErrorMarker {
    pub fn new(seq_id: &str) -> Self {
        Self {
            seq_id: seq_id.to_string(),
            timestamps: Vec::new(),
        }
    }

    /// Failure offsets relative to the first failure, in order. The backoff
    /// policy is a pure function of this list.
    pub fn relative_offsets(&self) -> Vec<Duration> {
        let Some(first) = self.timestamps.first().copied() else {
            return Vec::new();
        };
        self.timestamps
            .iter()
            .map(|t| (*t - first).to_std().unwrap_or(Duration::ZERO))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let a = Fingerprint::new("list_machines", "org-1", &serde_json::json!(["c1", "c2"]));
        let b = Fingerprint::new("list_machines", "org-1", &serde_json::json!(["c2", "c1"]));
        assert_ne!(a, b);

        let c = Fingerprint::new("list_machines", "org-1", &serde_json::json!(["c1", "c2"]));
        assert_eq!(a, c);
    }

    #[test]
    fn test_fingerprint_distinguishes_task_and_owner() {
        let args = serde_json::json!({"cloud_id": "c1"});
        let a = Fingerprint::new("list_machines", "org-1", &args);
        let b = Fingerprint::new("list_images", "org-1", &args);
        let c = Fingerprint::new("list_machines", "org-2", &args);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_relative_offsets_start_at_zero() {
        let mut marker = ErrorMarker::new("seq-1");
        let t0 = Utc::now();
        marker.timestamps.push(t0);
        marker.timestamps.push(t0 + chrono::Duration::seconds(30));
        marker.timestamps.push(t0 + chrono::Duration::seconds(90));

        let offsets = marker.relative_offsets();
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[1], Duration::from_secs(30));
        assert_eq!(offsets[2], Duration::from_secs(90));
    }
}
