//! The schedule entity: what to run, on which machines, when.
//!
//! A schedule never stores the machines it applies to. It stores conditions,
//! and both the target set and the enablement are recomputed from the live
//! collection at fire time, so stale registrations cannot fire against
//! machines that no longer qualify.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use nimbus_core::{MachineInventory, MachineState, NimbusError, Result};

use crate::conditions::{self, Condition};
use crate::crontab;
use crate::persistence::ScheduleStore;

/// Unit for interval triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl Period {
    pub fn to_secs(self, every: u64) -> u64 {
        match self {
            Period::Days => every * 86_400,
            Period::Hours => every * 3_600,
            Period::Minutes => every * 60,
            Period::Seconds => every,
        }
    }
}

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Interval { every: u64, period: Period },
    Crontab {
        minute: String,
        hour: String,
        day_of_week: String,
        day_of_month: String,
        month_of_year: String,
    },
    OneOff { at: DateTime<Utc> },
}

impl Trigger {
    pub fn validate(&self) -> Result<()> {
        match self {
            Trigger::Interval { every, .. } => {
                if *every == 0 {
                    return Err(NimbusError::MalformedTrigger(
                        "interval must be positive".into(),
                    ));
                }
            }
            Trigger::Crontab {
                minute,
                hour,
                day_of_week,
                day_of_month,
                month_of_year,
            } => {
                crontab::parse_field(minute, crontab::MINUTE.0, crontab::MINUTE.1)?;
                crontab::parse_field(hour, crontab::HOUR.0, crontab::HOUR.1)?;
                crontab::parse_field(day_of_week, crontab::DAY_OF_WEEK.0, crontab::DAY_OF_WEEK.1)?;
                crontab::parse_field(
                    day_of_month,
                    crontab::DAY_OF_MONTH.0,
                    crontab::DAY_OF_MONTH.1,
                )?;
                crontab::parse_field(
                    month_of_year,
                    crontab::MONTH_OF_YEAR.0,
                    crontab::MONTH_OF_YEAR.1,
                )?;
            }
            Trigger::OneOff { .. } => {}
        }
        Ok(())
    }
}

/// What a schedule does to each target machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleTask {
    MachineAction { action: String },
    RunScript { script_id: String },
}

impl ScheduleTask {
    pub fn validate(&self) -> Result<()> {
        match self {
            ScheduleTask::MachineAction { action } => {
                if action.is_empty() {
                    return Err(NimbusError::MissingRequiredField("action".into()));
                }
            }
            ScheduleTask::RunScript { script_id } => {
                if script_id.is_empty() {
                    return Err(NimbusError::MissingRequiredField("script_id".into()));
                }
            }
        }
        Ok(())
    }

    /// Task-kind key this schedule fans out to.
    pub fn task_key(&self) -> &'static str {
        match self {
            ScheduleTask::MachineAction { .. } => "machine_action",
            ScheduleTask::RunScript { .. } => "run_script",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger: Trigger,
    pub task: ScheduleTask,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Administrative on/off switch, independent of expiry and run caps.
    pub task_enabled: bool,
    /// Fire once right after creation, before the first regular tick.
    #[serde(default)]
    pub run_immediately: bool,
    pub expires: Option<DateTime<Utc>>,
    pub start_after: Option<DateTime<Utc>>,
    pub max_run_count: Option<u32>,
    pub total_run_count: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Soft-deletion timestamp. A deleted schedule stays in storage but is
    /// excluded from name uniqueness and never fires again.
    pub deleted: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

impl Schedule {
    pub fn new(owner_id: &str, name: &str, trigger: Trigger, task: ScheduleTask) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            trigger,
            task,
            conditions: Vec::new(),
            task_enabled: true,
            run_immediately: false,
            expires: None,
            start_after: None,
            max_run_count: None,
            total_run_count: 0,
            last_run_at: None,
            deleted: None,
            created: Utc::now(),
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_start_after(mut self, start_after: DateTime<Utc>) -> Self {
        self.start_after = Some(start_after);
        self
    }

    pub fn with_max_run_count(mut self, max: u32) -> Self {
        self.max_run_count = Some(max);
        self
    }

    pub fn with_run_immediately(mut self, run_immediately: bool) -> Self {
        self.run_immediately = run_immediately;
        self
    }

    /// Validate and persist a new schedule. The name must be unique among
    /// the owner's non-deleted schedules.
    pub fn add(self, store: &ScheduleStore) -> Result<Schedule> {
        if self.name.trim().is_empty() {
            return Err(NimbusError::MissingRequiredField("name".into()));
        }
        if store.get_by_name(&self.owner_id, &self.name)?.is_some() {
            return Err(NimbusError::DuplicateName(self.name.clone()));
        }
        self.trigger.validate()?;
        self.task.validate()?;
        for condition in &self.conditions {
            condition.validate()?;
        }
        store.save(&self)?;
        tracing::info!("📅 schedule added: '{}' ({})", self.name, self.id);
        Ok(self)
    }

    /// Machines this schedule applies to right now. Terminated machines are
    /// excluded even when a condition would select them.
    pub fn target_ids(&self, inventory: &MachineInventory, now: DateTime<Utc>) -> Vec<String> {
        let machines: Vec<_> = inventory
            .owned_by(&self.owner_id)
            .into_iter()
            .filter(|m| m.state != MachineState::Terminated)
            .collect();
        let mut ids = conditions::resolve(&self.conditions, &machines, now);
        ids.sort_unstable();
        ids
    }

    /// Whether the schedule may fire at `now`. Evaluated fresh on every
    /// tick; there is no cached enablement state anywhere.
    pub fn enabled(&self, inventory: &MachineInventory, now: DateTime<Utc>) -> bool {
        self.deleted.is_none()
            && self.task_enabled
            && self.expires.map_or(true, |e| e > now)
            && self.start_after.map_or(true, |s| now >= s)
            && self.max_run_count.map_or(true, |m| self.total_run_count < m)
            && !self.target_ids(inventory, now).is_empty()
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.deleted = Some(now);
    }

    /// Summary view for the API boundary and audit payloads.
    pub fn as_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "owner_id": self.owner_id,
            "name": self.name,
            "description": self.description,
            "trigger": self.trigger,
            "task": self.task,
            "conditions": self.conditions,
            "task_enabled": self.task_enabled,
            "run_immediately": self.run_immediately,
            "expires": self.expires,
            "start_after": self.start_after,
            "max_run_count": self.max_run_count,
            "total_run_count": self.total_run_count,
            "last_run_at": self.last_run_at,
            "created": self.created,
        })
    }
}
