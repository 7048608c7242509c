//! Due-time bookkeeping and the tick loop that drives schedules.
//!
//! The timer only decides *when* a schedule is due; whether it actually
//! fires is re-checked inside `GroupRunner::fire` against the live
//! collection, so the two can disagree harmlessly (a due-but-disabled
//! schedule is simply skipped).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::crontab;
use crate::group::GroupRunner;
use crate::persistence::ScheduleStore;
use crate::schedules::{Schedule, Trigger};

/// Per-schedule next-due state. Interval anchors live here, not in storage:
/// a restart re-anchors intervals to the last recorded run (or to "now" for
/// never-run schedules).
#[derive(Default)]
pub struct ScheduleTimer {
    next_due: HashMap<String, DateTime<Utc>>,
}

impl ScheduleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `schedule` should fire at `now`, advancing the bookkeeping
    /// if it does.
    pub fn is_due(&mut self, schedule: &Schedule, now: DateTime<Utc>) -> bool {
        if schedule.start_after.is_some_and(|s| now < s) {
            return false;
        }
        match &schedule.trigger {
            Trigger::Interval { every, period } => {
                let step = chrono::Duration::seconds(period.to_secs(*every) as i64);
                let due = *self.next_due.entry(schedule.id.clone()).or_insert_with(|| {
                    if let Some(last) = schedule.last_run_at {
                        last + step
                    } else if schedule.run_immediately {
                        now
                    } else {
                        now + step
                    }
                });
                if due <= now {
                    self.next_due.insert(schedule.id.clone(), now + step);
                    true
                } else {
                    false
                }
            }
            Trigger::OneOff { at } => schedule.total_run_count == 0 && *at <= now,
            Trigger::Crontab { .. } => self.crontab_due(schedule, now),
        }
    }

    /// A crontab schedule is due when the current minute matches all five
    /// fields and it has not already fired within this minute.
    fn crontab_due(&mut self, schedule: &Schedule, now: DateTime<Utc>) -> bool {
        let Trigger::Crontab {
            minute,
            hour,
            day_of_week,
            day_of_month,
            month_of_year,
        } = &schedule.trigger
        else {
            return false;
        };
        let matches = field_matches(minute, crontab::MINUTE, now.minute())
            && field_matches(hour, crontab::HOUR, now.hour())
            && field_matches(
                day_of_week,
                crontab::DAY_OF_WEEK,
                now.weekday().num_days_from_sunday(),
            )
            && field_matches(day_of_month, crontab::DAY_OF_MONTH, now.day())
            && field_matches(month_of_year, crontab::MONTH_OF_YEAR, now.month());
        if !matches {
            return false;
        }
        let this_minute = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        if self.next_due.get(&schedule.id) == Some(&this_minute) {
            return false;
        }
        self.next_due.insert(schedule.id.clone(), this_minute);
        true
    }

    /// Drop bookkeeping for schedules that no longer exist.
    pub fn retain(&mut self, live_ids: &[String]) {
        self.next_due.retain(|id, _| live_ids.contains(id));
    }
}

fn field_matches(spec: &str, bounds: (u32, u32), value: u32) -> bool {
    crontab::parse_field(spec, bounds.0, bounds.1)
        .map(|values| values.contains(&value))
        .unwrap_or(false)
}

/// Background loop: every `tick` scan the store and fire due schedules.
pub async fn spawn_timer(store: Arc<ScheduleStore>, group: Arc<GroupRunner>, tick: Duration) {
    tracing::info!("⏰ schedule timer started (tick every {}s)", tick.as_secs());
    let mut timer = ScheduleTimer::new();
    let mut interval = tokio::time::interval(tick);

    loop {
        interval.tick().await;
        let now = Utc::now();
        let schedules = match store.load_all() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("⚠️ failed to load schedules: {e}");
                continue;
            }
        };
        timer.retain(&schedules.iter().map(|s| s.id.clone()).collect::<Vec<_>>());

        for schedule in schedules {
            if timer.is_due(&schedule, now) {
                if let Err(e) = group.fire(&schedule.id).await {
                    tracing::warn!("⚠️ schedule '{}' failed to fire: {e}", schedule.name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedules::{Period, ScheduleTask};
    use chrono::TimeZone;

    fn interval_schedule(every: u64, period: Period) -> Schedule {
        Schedule::new(
            "org-1",
            "s",
            Trigger::Interval { every, period },
            ScheduleTask::MachineAction {
                action: "stop".into(),
            },
        )
    }

    #[test]
    fn test_interval_waits_one_step_then_repeats() {
        let mut timer = ScheduleTimer::new();
        let schedule = interval_schedule(5, Period::Minutes);
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

        assert!(!timer.is_due(&schedule, t0));
        assert!(!timer.is_due(&schedule, t0 + chrono::Duration::minutes(4)));
        assert!(timer.is_due(&schedule, t0 + chrono::Duration::minutes(5)));
        // Advanced: not due again until another full step
        assert!(!timer.is_due(&schedule, t0 + chrono::Duration::minutes(6)));
        assert!(timer.is_due(&schedule, t0 + chrono::Duration::minutes(10)));
    }

    #[test]
    fn test_run_immediately_fires_on_first_tick() {
        let mut timer = ScheduleTimer::new();
        let schedule = interval_schedule(1, Period::Hours).with_run_immediately(true);
        assert!(timer.is_due(&schedule, Utc::now()));
    }

    #[test]
    fn test_interval_anchors_to_last_run_after_restart() {
        let mut timer = ScheduleTimer::new();
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut schedule = interval_schedule(10, Period::Minutes);
        schedule.last_run_at = Some(t0 - chrono::Duration::minutes(11));
        // Overdue relative to the recorded run: fires on the first tick
        assert!(timer.is_due(&schedule, t0));
    }

    #[test]
    fn test_one_off_fires_exactly_once() {
        let mut timer = ScheduleTimer::new();
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        let mut schedule = Schedule::new(
            "org-1",
            "s",
            Trigger::OneOff { at },
            ScheduleTask::MachineAction {
                action: "start".into(),
            },
        );

        assert!(!timer.is_due(&schedule, at - chrono::Duration::minutes(1)));
        assert!(timer.is_due(&schedule, at));
        schedule.total_run_count = 1;
        assert!(!timer.is_due(&schedule, at + chrono::Duration::minutes(1)));
    }

    #[test]
    fn test_start_after_gates_firing() {
        let mut timer = ScheduleTimer::new();
        let now = Utc::now();
        let schedule = interval_schedule(1, Period::Minutes)
            .with_run_immediately(true)
            .with_start_after(now + chrono::Duration::hours(1));
        assert!(!timer.is_due(&schedule, now));
    }

    #[test]
    fn test_crontab_matches_minute_once() {
        let mut timer = ScheduleTimer::new();
        let schedule = Schedule::new(
            "org-1",
            "s",
            Trigger::Crontab {
                minute: "30".into(),
                hour: "8".into(),
                day_of_week: "*".into(),
                day_of_month: "*".into(),
                month_of_year: "*".into(),
            },
            ScheduleTask::MachineAction {
                action: "start".into(),
            },
        );

        let off = Utc.with_ymd_and_hms(2026, 8, 3, 8, 29, 0).unwrap();
        assert!(!timer.is_due(&schedule, off));

        let hit = Utc.with_ymd_and_hms(2026, 8, 3, 8, 30, 10).unwrap();
        assert!(timer.is_due(&schedule, hit));
        // Same minute, later second: already fired
        assert!(!timer.is_due(&schedule, hit + chrono::Duration::seconds(20)));
        // Next day, same time: fires again
        let next = Utc.with_ymd_and_hms(2026, 8, 4, 8, 30, 0).unwrap();
        assert!(timer.is_due(&schedule, next));
    }
}
