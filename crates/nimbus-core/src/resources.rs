//! The machine (resource) model — only the fields the scheduler and the
//! condition engine need. The full persistence schema lives outside this
//! core and is consumed through `MachineInventory`.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Running,
    Stopped,
    Pending,
    Unknown,
    Terminated,
}

/// A cached view of one cloud machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    /// Internal id, unique across clouds.
    pub id: String,
    /// Owning tenant.
    pub owner_id: String,
    /// Cloud the machine lives in.
    pub cloud_id: String,
    /// Provider-side id.
    pub external_id: String,
    pub name: String,
    pub state: MachineState,
    pub created: DateTime<Utc>,
    /// Tag key/value pairs, keys and values in `[a-z0-9_-]`.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Machine {
    pub fn new(id: &str, owner_id: &str, cloud_id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            cloud_id: cloud_id.to_string(),
            external_id: id.to_string(),
            name: name.to_string(),
            state: MachineState::Running,
            created: Utc::now(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_state(mut self, state: MachineState) -> Self {
        self.state = state;
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    /// JSON view used by field-comparison conditions.
    pub fn as_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// In-memory machine collection, keyed by machine id.
///
/// This is the narrow interface the scheduling core sees; the real system
/// keeps it up to date from the polling tasks' list results.
#[derive(Default)]
pub struct MachineInventory {
    machines: RwLock<HashMap<String, Machine>>,
}

impl MachineInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, machine: Machine) {
        self.machines
            .write()
            .expect("inventory lock poisoned")
            .insert(machine.id.clone(), machine);
    }

    pub fn remove(&self, id: &str) -> Option<Machine> {
        self.machines.write().expect("inventory lock poisoned").remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Machine> {
        self.machines
            .read()
            .expect("inventory lock poisoned")
            .get(id)
            .cloned()
    }

    /// All machines for one tenant.
    pub fn owned_by(&self, owner_id: &str) -> Vec<Machine> {
        self.machines
            .read()
            .expect("inventory lock poisoned")
            .values()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.machines.read().expect("inventory lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_by_filters_tenant() {
        let inv = MachineInventory::new();
        inv.upsert(Machine::new("m1", "org-a", "c1", "web-1"));
        inv.upsert(Machine::new("m2", "org-a", "c1", "web-2"));
        inv.upsert(Machine::new("m3", "org-b", "c2", "db-1"));

        assert_eq!(inv.owned_by("org-a").len(), 2);
        assert_eq!(inv.owned_by("org-b").len(), 1);
        assert!(inv.owned_by("org-c").is_empty());
    }

    #[test]
    fn test_as_json_exposes_fields() {
        let m = Machine::new("m1", "org-a", "c1", "web-1").with_tag("env", "staging");
        let v = m.as_json();
        assert_eq!(v["name"], "web-1");
        assert_eq!(v["state"], "running");
        assert_eq!(v["tags"]["env"], "staging");
    }
}
