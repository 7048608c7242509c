//! The provider adapter seam. The task framework treats every cloud call as
//! an opaque operation behind this trait; the per-vendor adapters live
//! outside this core.

use async_trait::async_trait;
use nimbus_core::Result;
use serde_json::{json, Value};

/// Narrow interface to a cloud provider adapter. Each call returns an opaque
/// JSON payload which the framework caches and republishes as-is.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn list_machines(&self, owner_id: &str, cloud_id: &str) -> Result<Value>;
    async fn list_sizes(&self, owner_id: &str, cloud_id: &str) -> Result<Value>;
    async fn list_images(&self, owner_id: &str, cloud_id: &str) -> Result<Value>;
    async fn list_locations(&self, owner_id: &str, cloud_id: &str) -> Result<Value>;
    /// Probe a machine over SSH.
    async fn probe_ssh(&self, owner_id: &str, machine_id: &str, host: &str) -> Result<Value>;
    /// ICMP reachability probe.
    async fn ping(&self, owner_id: &str, host: &str) -> Result<Value>;
    /// Perform a lifecycle action (`start`, `stop`, `reboot`, `destroy`).
    async fn machine_action(&self, owner_id: &str, machine_id: &str, action: &str) -> Result<Value>;
    /// Execute a stored script on a machine.
    async fn run_script(
        &self,
        owner_id: &str,
        machine_id: &str,
        script_id: &str,
        job_id: &str,
    ) -> Result<Value>;
}

/// No-op provider used when no real adapter is wired in (development and
/// the standalone daemon). Returns empty, well-formed payloads.
#[derive(Default)]
pub struct DummyProvider;

#[async_trait]
impl CloudProvider for DummyProvider {
    async fn list_machines(&self, _owner_id: &str, cloud_id: &str) -> Result<Value> {
        Ok(json!({"cloud_id": cloud_id, "machines": []}))
    }

    async fn list_sizes(&self, _owner_id: &str, cloud_id: &str) -> Result<Value> {
        Ok(json!({"cloud_id": cloud_id, "sizes": []}))
    }

    async fn list_images(&self, _owner_id: &str, cloud_id: &str) -> Result<Value> {
        Ok(json!({"cloud_id": cloud_id, "images": []}))
    }

    async fn list_locations(&self, _owner_id: &str, cloud_id: &str) -> Result<Value> {
        Ok(json!({"cloud_id": cloud_id, "locations": []}))
    }

    async fn probe_ssh(&self, _owner_id: &str, machine_id: &str, host: &str) -> Result<Value> {
        Ok(json!({"machine_id": machine_id, "host": host, "result": {"uptime": null}}))
    }

    async fn ping(&self, _owner_id: &str, host: &str) -> Result<Value> {
        Ok(json!({"host": host, "result": {"packets_rx": 0}}))
    }

    async fn machine_action(&self, _owner_id: &str, machine_id: &str, action: &str) -> Result<Value> {
        Ok(json!({"machine_id": machine_id, "action": action, "ok": true}))
    }

    async fn run_script(
        &self,
        _owner_id: &str,
        machine_id: &str,
        script_id: &str,
        job_id: &str,
    ) -> Result<Value> {
        Ok(json!({
            "machine_id": machine_id,
            "script_id": script_id,
            "job_id": job_id,
            "exit_code": 0,
            "stdout": "",
        }))
    }
}
