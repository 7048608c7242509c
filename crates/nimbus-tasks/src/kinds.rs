//! Task kinds — per-type policy plus the underlying operation.
//!
//! A task kind is a small interface: identity, freshness window, retention
//! window, polling flag, soft time limit, the opaque operation itself, and
//! the failure policy. The framework composes kinds; it never inherits from
//! them. Policy constants here are tuned defaults, not load-bearing
//! correctness — the framework only requires that `retry_delay` be a pure
//! function of (error, ordered failure history).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nimbus_core::{NimbusError, Result};
use serde_json::{json, Value};

use crate::provider::CloudProvider;

/// Shared context handed to every task execution.
pub struct TaskContext {
    pub provider: Arc<dyn CloudProvider>,
}

/// One task type: policy attributes plus the wrapped operation.
#[async_trait]
pub trait TaskKind: Send + Sync {
    /// Stable identifier, also the result-stream topic.
    fn key(&self) -> &'static str;

    /// Freshness window: a cached result younger than this is returned
    /// without re-running.
    fn result_fresh(&self) -> Duration {
        Duration::ZERO
    }

    /// Retention window: a cached result older than this is treated as
    /// absent. Always >= the freshness window.
    fn result_expires(&self) -> Duration {
        Duration::ZERO
    }

    /// Polling-class tasks re-enqueue themselves after success to keep the
    /// cache continuously refreshed.
    fn polling(&self) -> bool {
        false
    }

    /// Soft time limit: a run exceeding this is aborted and counted as a
    /// transient failure.
    fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Whether the backpressure gate applies. Cached/polling list and probe
    /// tasks stop when nobody consumes their results; schedule-fanned
    /// action and script tasks run regardless.
    fn requires_listener(&self) -> bool {
        true
    }

    /// The wrapped operation.
    async fn execute(&self, ctx: &TaskContext, owner_id: &str, args: &Value) -> Result<Value>;

    /// Backoff policy: relative offsets of consecutive failures in, delay
    /// until the next attempt out. `None` stops the chain.
    ///
    /// Default table: 30s after the first failure, 120s after the second,
    /// 10min after the third, then stop.
    fn retry_delay(&self, _error: &NimbusError, offsets: &[Duration]) -> Option<Duration> {
        match offsets.len() {
            1 => Some(Duration::from_secs(30)),
            2 => Some(Duration::from_secs(120)),
            3 => Some(Duration::from_secs(600)),
            _ => None,
        }
    }

    /// Owner notification emitted when a failure threshold is crossed.
    /// Returns a message exactly at the crossing, `None` otherwise.
    fn failure_notice(&self, _offsets: &[Duration], _args: &Value) -> Option<String> {
        None
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| NimbusError::MissingRequiredField(key.to_string()))
}

/// Registry of task kinds, keyed by task key.
#[derive(Default)]
pub struct TaskRegistry {
    kinds: HashMap<&'static str, Arc<dyn TaskKind>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in kinds.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ListMachines));
        registry.register(Arc::new(ListSizes));
        registry.register(Arc::new(ListImages));
        registry.register(Arc::new(ListLocations));
        registry.register(Arc::new(ProbeSsh));
        registry.register(Arc::new(Ping));
        registry.register(Arc::new(MachineAction));
        registry.register(Arc::new(RunScript));
        registry
    }

    pub fn register(&mut self, kind: Arc<dyn TaskKind>) {
        debug_assert!(kind.result_fresh() <= kind.result_expires() || kind.result_expires().is_zero());
        self.kinds.insert(kind.key(), kind);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn TaskKind>> {
        self.kinds.get(key).cloned()
    }
}

// ─── Polling list/probe kinds ──────────────────────────────────

/// List a cloud's machines. The workhorse polling task: a 10s freshness
/// window keeps machine state near-live while consumers are connected.
pub struct ListMachines;

#[async_trait]
impl TaskKind for ListMachines {
    fn key(&self) -> &'static str {
        "list_machines"
    }

    fn result_fresh(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn result_expires(&self) -> Duration {
        Duration::from_secs(60 * 60 * 24)
    }

    fn polling(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &TaskContext, owner_id: &str, args: &Value) -> Result<Value> {
        let cloud_id = str_arg(args, "cloud_id")?;
        ctx.provider.list_machines(owner_id, cloud_id).await
    }

    /// Retry at the freshness interval for the first five failures, then
    /// every 30s for 10 minutes, every 60s for 20 minutes, and finally
    /// settle into a 20-minute steady state.
    fn retry_delay(&self, _error: &NimbusError, offsets: &[Duration]) -> Option<Duration> {
        if offsets.len() < 6 {
            return Some(self.result_fresh());
        }
        let index = offsets.len() - 6;
        if index < 20 {
            Some(Duration::from_secs(30))
        } else if index < 40 {
            Some(Duration::from_secs(60))
        } else {
            Some(Duration::from_secs(20 * 60))
        }
    }

    /// Tell the owner once, at the sixth consecutive failure.
    fn failure_notice(&self, offsets: &[Duration], args: &Value) -> Option<String> {
        if offsets.len() == 6 {
            let cloud_id = args.get("cloud_id").and_then(|v| v.as_str()).unwrap_or("?");
            Some(format!("Cloud {cloud_id} does not respond"))
        } else {
            None
        }
    }
}

/// List a cloud's machine sizes. Rarely changes, so a long freshness window.
pub struct ListSizes;

#[async_trait]
impl TaskKind for ListSizes {
    fn key(&self) -> &'static str {
        "list_sizes"
    }

    fn result_fresh(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    fn result_expires(&self) -> Duration {
        Duration::from_secs(60 * 60 * 24 * 7)
    }

    fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, ctx: &TaskContext, owner_id: &str, args: &Value) -> Result<Value> {
        let cloud_id = str_arg(args, "cloud_id")?;
        ctx.provider.list_sizes(owner_id, cloud_id).await
    }
}

/// List a cloud's images.
pub struct ListImages;

#[async_trait]
impl TaskKind for ListImages {
    fn key(&self) -> &'static str {
        "list_images"
    }

    fn result_fresh(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    fn result_expires(&self) -> Duration {
        Duration::from_secs(60 * 60 * 24 * 7)
    }

    fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(120)
    }

    async fn execute(&self, ctx: &TaskContext, owner_id: &str, args: &Value) -> Result<Value> {
        let cloud_id = str_arg(args, "cloud_id")?;
        ctx.provider.list_images(owner_id, cloud_id).await
    }
}

/// List a cloud's locations.
pub struct ListLocations;

#[async_trait]
impl TaskKind for ListLocations {
    fn key(&self) -> &'static str {
        "list_locations"
    }

    fn result_fresh(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    fn result_expires(&self) -> Duration {
        Duration::from_secs(60 * 60 * 24 * 7)
    }

    fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, ctx: &TaskContext, owner_id: &str, args: &Value) -> Result<Value> {
        let cloud_id = str_arg(args, "cloud_id")?;
        ctx.provider.list_locations(owner_id, cloud_id).await
    }
}

/// SSH reachability probe of one machine.
pub struct ProbeSsh;

#[async_trait]
impl TaskKind for ProbeSsh {
    fn key(&self) -> &'static str {
        "probe"
    }

    fn result_fresh(&self) -> Duration {
        Duration::from_secs(60 * 2)
    }

    fn result_expires(&self) -> Duration {
        Duration::from_secs(60 * 60 * 2)
    }

    fn polling(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &TaskContext, owner_id: &str, args: &Value) -> Result<Value> {
        let machine_id = str_arg(args, "machine_id")?;
        let host = str_arg(args, "host")?;
        ctx.provider.probe_ssh(owner_id, machine_id, host).await
    }

    /// Retry in 2, 4, 8, 16, 32, 32, ... minutes.
    fn retry_delay(&self, _error: &NimbusError, offsets: &[Duration]) -> Option<Duration> {
        let exp = offsets.len().min(5) as u32;
        Some(Duration::from_secs(60 * 2u64.pow(exp)).min(Duration::from_secs(60 * 32)))
    }
}

/// ICMP reachability probe of one machine.
pub struct Ping;

#[async_trait]
impl TaskKind for Ping {
    fn key(&self) -> &'static str {
        "ping"
    }

    fn result_fresh(&self) -> Duration {
        Duration::from_secs(60 * 15)
    }

    fn result_expires(&self) -> Duration {
        Duration::from_secs(60 * 60 * 2)
    }

    fn polling(&self) -> bool {
        true
    }

    fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, ctx: &TaskContext, owner_id: &str, args: &Value) -> Result<Value> {
        let host = str_arg(args, "host")?;
        let res = ctx.provider.ping(owner_id, host).await?;
        Ok(json!({"host": host, "result": res}))
    }

    /// Constant retry at the freshness interval.
    fn retry_delay(&self, _error: &NimbusError, _offsets: &[Duration]) -> Option<Duration> {
        Some(self.result_fresh())
    }
}

// ─── Batch fan-out kinds ───────────────────────────────────────

/// One lifecycle action on one machine, fanned out by the group runner.
/// Never cached, never polled: each run is a fresh provider call.
pub struct MachineAction;

#[async_trait]
impl TaskKind for MachineAction {
    fn key(&self) -> &'static str {
        "machine_action"
    }

    fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn requires_listener(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &TaskContext, owner_id: &str, args: &Value) -> Result<Value> {
        let machine_id = str_arg(args, "machine_id")?;
        let action = str_arg(args, "action")?;
        let result = ctx.provider.machine_action(owner_id, machine_id, action).await?;
        Ok(json!({
            "machine_id": machine_id,
            "action": action,
            "job_id": args.get("job_id").cloned().unwrap_or(Value::Null),
            "result": result,
        }))
    }

    /// Action tasks never loop: fail once, stop.
    fn retry_delay(&self, _error: &NimbusError, _offsets: &[Duration]) -> Option<Duration> {
        None
    }
}

/// One script execution on one machine, fanned out by the group runner.
pub struct RunScript;

#[async_trait]
impl TaskKind for RunScript {
    fn key(&self) -> &'static str {
        "run_script"
    }

    fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn requires_listener(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &TaskContext, owner_id: &str, args: &Value) -> Result<Value> {
        let machine_id = str_arg(args, "machine_id")?;
        let script_id = str_arg(args, "script_id")?;
        let job_id = args.get("job_id").and_then(|v| v.as_str()).unwrap_or("");
        ctx.provider
            .run_script(owner_id, machine_id, script_id, job_id)
            .await
    }

    fn retry_delay(&self, _error: &NimbusError, _offsets: &[Duration]) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(n: usize) -> Vec<Duration> {
        (0..n).map(|i| Duration::from_secs(30 * i as u64)).collect()
    }

    #[test]
    fn test_default_backoff_escalates_then_stops() {
        let kind = ListSizes;
        let err = NimbusError::Execution("boom".into());
        let d1 = kind.retry_delay(&err, &offsets(1)).unwrap();
        let d2 = kind.retry_delay(&err, &offsets(2)).unwrap();
        let d3 = kind.retry_delay(&err, &offsets(3)).unwrap();
        assert!(d1 < d2 && d2 <= d3);
        assert_eq!(d1, Duration::from_secs(30));
        assert_eq!(d2, Duration::from_secs(120));
        assert_eq!(d3, Duration::from_secs(600));
        assert!(kind.retry_delay(&err, &offsets(4)).is_none());
    }

    #[test]
    fn test_probe_backoff_doubles_and_caps() {
        let kind = ProbeSsh;
        let err = NimbusError::Execution("unreachable".into());
        assert_eq!(kind.retry_delay(&err, &offsets(1)), Some(Duration::from_secs(120)));
        assert_eq!(kind.retry_delay(&err, &offsets(2)), Some(Duration::from_secs(240)));
        assert_eq!(kind.retry_delay(&err, &offsets(3)), Some(Duration::from_secs(480)));
        // Capped at 32 minutes no matter how long the history grows
        assert_eq!(kind.retry_delay(&err, &offsets(10)), Some(Duration::from_secs(1920)));
        assert_eq!(kind.retry_delay(&err, &offsets(50)), Some(Duration::from_secs(1920)));
    }

    #[test]
    fn test_list_machines_backoff_reaches_steady_state() {
        let kind = ListMachines;
        let err = NimbusError::Execution("timeout".into());
        // First five failures: retry when the result would no longer be fresh
        assert_eq!(kind.retry_delay(&err, &offsets(1)), Some(Duration::from_secs(10)));
        assert_eq!(kind.retry_delay(&err, &offsets(5)), Some(Duration::from_secs(10)));
        // Then 30s for 10 minutes, 60s for 20 minutes
        assert_eq!(kind.retry_delay(&err, &offsets(6)), Some(Duration::from_secs(30)));
        assert_eq!(kind.retry_delay(&err, &offsets(26)), Some(Duration::from_secs(60)));
        // Finally the 20-minute steady state, forever
        assert_eq!(kind.retry_delay(&err, &offsets(46)), Some(Duration::from_secs(1200)));
        assert_eq!(kind.retry_delay(&err, &offsets(200)), Some(Duration::from_secs(1200)));
    }

    #[test]
    fn test_list_machines_notice_only_at_sixth_failure() {
        let kind = ListMachines;
        let args = serde_json::json!({"cloud_id": "c1"});
        assert!(kind.failure_notice(&offsets(5), &args).is_none());
        let notice = kind.failure_notice(&offsets(6), &args).unwrap();
        assert!(notice.contains("c1"));
        assert!(kind.failure_notice(&offsets(7), &args).is_none());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TaskRegistry::with_builtin();
        assert!(registry.get("list_machines").is_some());
        assert!(registry.get("probe").is_some());
        assert!(registry.get("machine_action").is_some());
        assert!(registry.get("no_such_task").is_none());
    }

    #[test]
    fn test_freshness_never_exceeds_retention() {
        let registry = TaskRegistry::with_builtin();
        for key in ["list_machines", "list_sizes", "list_images", "probe", "ping"] {
            let kind = registry.get(key).unwrap();
            assert!(kind.result_fresh() <= kind.result_expires(), "{key}");
        }
    }
}
