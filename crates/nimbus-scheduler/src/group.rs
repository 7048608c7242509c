//! Batch fan-out: one schedule firing becomes one framework task per
//! target machine, all sharing a batch job id.
//!
//! Target failures are isolated. Each target runs in its own tokio task, so
//! neither an error outcome nor a panic cancels the siblings; the batch
//! just records it and moves on.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use nimbus_core::{AuditLog, MachineInventory, NimbusError, Result};
use nimbus_tasks::{RunOutcome, SessionBus, TaskEnvelope, TaskRunner};

use crate::persistence::ScheduleStore;
use crate::schedules::{Schedule, ScheduleTask};

pub struct GroupRunner {
    runner: Arc<TaskRunner>,
    store: Arc<ScheduleStore>,
    inventory: Arc<MachineInventory>,
    bus: Arc<SessionBus>,
    audit: Arc<dyn AuditLog>,
}

impl GroupRunner {
    pub fn new(
        runner: Arc<TaskRunner>,
        store: Arc<ScheduleStore>,
        inventory: Arc<MachineInventory>,
        bus: Arc<SessionBus>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            runner,
            store,
            inventory,
            bus,
            audit,
        }
    }

    /// Fire one schedule: re-check enablement, resolve targets, fan out,
    /// record the run. A disabled schedule is skipped silently — the timer
    /// does not distinguish "due" from "due and still enabled".
    pub async fn fire(&self, schedule_id: &str) -> Result<()> {
        let schedule = self
            .store
            .get(schedule_id)?
            .ok_or_else(|| NimbusError::NotFound(format!("schedule '{schedule_id}'")))?;
        let now = Utc::now();

        if !schedule.enabled(&self.inventory, now) {
            tracing::debug!("⏭️ schedule '{}' not enabled, skipping", schedule.name);
            return Ok(());
        }

        let targets = schedule.target_ids(&self.inventory, now);
        let job_id = uuid::Uuid::new_v4().simple().to_string();
        tracing::info!(
            "🔔 schedule '{}' fired: {} target(s), job {job_id}",
            schedule.name,
            targets.len()
        );

        let mut policy = schedule.as_json();
        policy["machines_match"] = json!(targets);
        policy["job_id"] = json!(job_id);
        self.audit.record_event("schedule_started", policy);

        let handles: Vec<_> = targets
            .iter()
            .map(|machine_id| {
                let runner = self.runner.clone();
                let envelope = self.target_envelope(&schedule, machine_id, &job_id);
                let machine_id = machine_id.clone();
                tokio::spawn(async move { (machine_id, runner.run(envelope).await) })
            })
            .collect();

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut batch_error: Option<String> = None;
        for (machine_id, joined) in targets.iter().zip(futures::future::join_all(handles).await) {
            match joined {
                Ok((machine_id, RunOutcome::Completed(_))) => succeeded.push(machine_id),
                Ok((machine_id, outcome)) => {
                    tracing::warn!(
                        "⚠️ schedule '{}' target {machine_id}: {outcome:?}",
                        schedule.name
                    );
                    failed.push(machine_id);
                }
                Err(join_err) => {
                    tracing::error!(
                        "💥 schedule '{}' target {machine_id} panicked: {join_err}",
                        schedule.name
                    );
                    batch_error.get_or_insert_with(|| join_err.to_string());
                    failed.push(machine_id.clone());
                }
            }
        }

        self.store.record_run(&schedule.id, now)?;
        let total_run_count = self
            .store
            .get(&schedule.id)?
            .map(|s| s.total_run_count)
            .unwrap_or(schedule.total_run_count + 1);

        let summary = json!({
            "schedule_id": schedule.id,
            "name": schedule.name,
            "task": schedule.task.task_key(),
            "job_id": job_id,
            "machines_match": targets,
            "succeeded": succeeded,
            "failed": failed,
            "error": batch_error,
            "total_run_count": total_run_count,
            "last_run_at": now,
        });
        self.audit.record_event("schedule_finished", summary.clone());
        self.bus
            .publish(&schedule.owner_id, "schedules", summary)
            .await;
        Ok(())
    }

    fn target_envelope(&self, schedule: &Schedule, machine_id: &str, job_id: &str) -> TaskEnvelope {
        let args = match &schedule.task {
            ScheduleTask::MachineAction { action } => json!({
                "machine_id": machine_id,
                "action": action,
                "job_id": job_id,
            }),
            ScheduleTask::RunScript { script_id } => json!({
                "machine_id": machine_id,
                "script_id": script_id,
                "job_id": job_id,
            }),
        };
        TaskEnvelope::new(schedule.task.task_key(), &schedule.owner_id, args)
    }
}
