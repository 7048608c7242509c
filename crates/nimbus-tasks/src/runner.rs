//! The task runner: `submit` on the caller side, `run` on the worker side.
//!
//! Dedup is optimistic and eventually consistent. Two racing attempts for
//! the same fingerprint may both execute, but only the attempt whose
//! sequence id is still the recorded one publishes, caches and re-enqueues;
//! the other detects supersession and exits. Within one chain attempts are
//! strictly sequential — a re-enqueue happens only after the previous
//! attempt finishes, so a chain never has two in-flight runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use nimbus_cache::{CacheEntry, ErrorMarker, Fingerprint, ResultCache};
use nimbus_core::{AuditLog, NimbusError, Result};

use crate::bus::SessionBus;
use crate::kinds::{TaskContext, TaskRegistry};
use crate::provider::CloudProvider;
use crate::queue::{TaskEnvelope, WorkQueue};

/// How `submit` behaves on a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Suspend the caller until the operation completes.
    Blocking,
    /// Hand off to the work queue, return immediately with no result.
    Async,
}

/// Terminal state of one worker-side attempt. Only `Failed` counts against
/// the backoff policy; everything else is a normal exit.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Value),
    /// A newer sequence owns this fingerprint; this chain terminated.
    Superseded,
    /// Nobody is subscribed to the owner's results; polling stopped.
    NoListener,
    /// Redundant attempt (fresh cached result, or unknown task key).
    Dropped,
    Failed { rerun: Option<Duration> },
}

/// The scheduler/executor around every unit of work.
pub struct TaskRunner {
    kinds: TaskRegistry,
    cache: Arc<dyn ResultCache>,
    queue: Arc<dyn WorkQueue>,
    bus: Arc<SessionBus>,
    ctx: TaskContext,
    audit: Arc<dyn AuditLog>,
}

impl TaskRunner {
    pub fn new(
        kinds: TaskRegistry,
        cache: Arc<dyn ResultCache>,
        queue: Arc<dyn WorkQueue>,
        bus: Arc<SessionBus>,
        provider: Arc<dyn CloudProvider>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            kinds,
            cache,
            queue,
            bus,
            ctx: TaskContext { provider },
            audit,
        }
    }

    pub fn bus(&self) -> Arc<SessionBus> {
        self.bus.clone()
    }

    /// Caller-side entry point. Returns the cached payload when one exists
    /// within the retention window — scheduling a refresh as a side effect
    /// once the freshness window has passed — and otherwise either runs the
    /// task inline (`Blocking`) or enqueues it (`Async`, returns `None`).
    pub async fn submit(
        &self,
        task_key: &str,
        owner_id: &str,
        args: Value,
        mode: SubmitMode,
    ) -> Result<Option<Value>> {
        let kind = self
            .kinds
            .get(task_key)
            .ok_or_else(|| NimbusError::NotFound(format!("task kind '{task_key}'")))?;
        let fp = Fingerprint::new(task_key, owner_id, &args);

        if let Some(cached) = self.cache.get(&fp, kind.result_expires()).await {
            if cached.age() >= kind.result_fresh() {
                tracing::debug!("🔄 {fp}: stale result, scheduling refresh");
                self.queue
                    .enqueue(TaskEnvelope::new(task_key, owner_id, args), Duration::ZERO)
                    .await;
            } else {
                tracing::debug!("✨ {fp}: dedup hit");
            }
            return Ok(Some(cached.payload));
        }

        let envelope = TaskEnvelope::new(task_key, owner_id, args);
        match mode {
            SubmitMode::Blocking => match self.run(envelope).await {
                RunOutcome::Completed(payload) => Ok(Some(payload)),
                // Failures are absorbed by the backoff policy; the caller
                // only learns there is no result yet.
                _ => Ok(None),
            },
            SubmitMode::Async => {
                self.queue.enqueue(envelope, Duration::ZERO).await;
                Ok(None)
            }
        }
    }

    /// Worker-side execution of one attempt.
    pub async fn run(&self, envelope: TaskEnvelope) -> RunOutcome {
        let Some(kind) = self.kinds.get(&envelope.task_key) else {
            tracing::warn!("⚠️ unknown task key '{}', dropping", envelope.task_key);
            return RunOutcome::Dropped;
        };
        let fp = Fingerprint::new(&envelope.task_key, &envelope.owner_id, &envelope.args);

        // A failing fingerprint is owned by the chain recorded in its error
        // marker. A stale chain terminates here; a fresh submission takes
        // over and the old marker is superseded.
        let mut marker = self.cache.get_error(&fp).await;
        if let Some(m) = &marker {
            match envelope.seq_id.as_deref() {
                Some(seq) if seq != m.seq_id => {
                    tracing::debug!("🔁 {fp}: chain {seq} superseded by {}", m.seq_id);
                    return RunOutcome::Superseded;
                }
                None => {
                    marker = None;
                }
                _ => {}
            }
        }

        // Backpressure gate: polling for a disconnected owner is wasted
        // work. Flush failure state so the next submission starts clean.
        if kind.requires_listener() && !self.bus.is_listening(&envelope.owner_id).await {
            self.cache.clear_error(&fp).await;
            self.audit.record_event(
                "task_abandoned",
                json!({"task": envelope.task_key, "owner_id": envelope.owner_id, "reason": "no_listener"}),
            );
            return RunOutcome::NoListener;
        }

        if let Some(cached) = self.cache.get(&fp, kind.result_expires()).await {
            match envelope.seq_id.as_deref() {
                Some(seq) if seq != cached.seq_id => {
                    tracing::debug!("🔁 {fp}: newer chain {} active, stopping {seq}", cached.seq_id);
                    return RunOutcome::Superseded;
                }
                None if cached.age() < kind.result_fresh() => {
                    tracing::debug!("✨ {fp}: fresh submission with fresh result, dropping");
                    return RunOutcome::Dropped;
                }
                _ => {}
            }
        }

        // First attempt of an externally triggered invocation starts a new
        // chain; re-enqueued attempts carry their chain's id.
        let seq_id = envelope
            .seq_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let result = match tokio::time::timeout(
            kind.soft_time_limit(),
            kind.execute(&self.ctx, &envelope.owner_id, &envelope.args),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(NimbusError::SoftTimeLimit),
        };

        match result {
            Ok(payload) => {
                self.cache.clear_error(&fp).await;
                let published = self
                    .bus
                    .publish(&envelope.owner_id, &envelope.task_key, payload.clone())
                    .await;
                if kind.requires_listener() && !published {
                    // Result stream closed while we ran: stop the chain.
                    self.audit.record_event(
                        "task_abandoned",
                        json!({"task": envelope.task_key, "owner_id": envelope.owner_id, "reason": "stream_closed"}),
                    );
                    return RunOutcome::NoListener;
                }
                // Zero retention means non-cacheable: action/script results
                // carry per-batch args, so an entry would never be read and
                // only accumulate.
                if !kind.result_expires().is_zero() {
                    self.cache.put(&fp, CacheEntry::new(payload.clone(), &seq_id)).await;
                }
                self.audit.record_event(
                    "task_succeeded",
                    json!({"task": envelope.task_key, "owner_id": envelope.owner_id, "seq_id": seq_id}),
                );
                if kind.polling() {
                    tracing::debug!(
                        "🔂 {fp}: polling rerun in {}s [{seq_id}]",
                        kind.result_fresh().as_secs()
                    );
                    self.queue
                        .enqueue(envelope.with_seq(&seq_id), kind.result_fresh())
                        .await;
                }
                RunOutcome::Completed(payload)
            }
            Err(err) => {
                if matches!(err, NimbusError::SoftTimeLimit) {
                    tracing::error!("⏱️ soft time limit exceeded: {fp}");
                }
                let mut marker = marker.unwrap_or_else(|| ErrorMarker::new(&seq_id));
                marker.timestamps.push(Utc::now());
                let offsets = marker.relative_offsets();

                if let Some(notice) = kind.failure_notice(&offsets, &envelope.args) {
                    self.bus
                        .publish(
                            &envelope.owner_id,
                            "notifications",
                            json!({"title": notice, "task": envelope.task_key, "error": true}),
                        )
                        .await;
                }

                // Only transient errors consult the backoff table; a
                // malformed invocation would fail identically forever.
                let rerun = if err.is_transient() {
                    kind.retry_delay(&err, &offsets)
                } else {
                    None
                };
                self.audit.record_event(
                    "task_failed",
                    json!({
                        "task": envelope.task_key,
                        "owner_id": envelope.owner_id,
                        "seq_id": seq_id,
                        "error": err.to_string(),
                        "consecutive_failures": offsets.len(),
                        "rerun_secs": rerun.map(|d| d.as_secs()),
                    }),
                );
                match rerun {
                    Some(delay) => {
                        self.cache.put_error(&fp, marker).await;
                        self.queue.enqueue(envelope.with_seq(&seq_id), delay).await;
                        RunOutcome::Failed { rerun: Some(delay) }
                    }
                    None => {
                        // Policy says stop: terminate the chain silently.
                        self.cache.clear_error(&fp).await;
                        RunOutcome::Failed { rerun: None }
                    }
                }
            }
        }
    }
}
