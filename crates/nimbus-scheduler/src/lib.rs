//! # Nimbus Scheduler
//!
//! The conditional scheduling engine: schedules owned by tenants, selecting
//! their target machines through declarative conditions and fanning out
//! framework tasks when their trigger is due.
//!
//! ## Flow
//! ```text
//! timer tick
//!   └── is_due(schedule)?
//!         └── GroupRunner::fire(id)
//!               ├── re-check enabled()      (fresh, against live machines)
//!               ├── resolve conditions      (conjunction, terminated excluded)
//!               ├── fan out one task/target (shared batch job id)
//!               ├── record_run              (counter + timestamp)
//!               └── audit + session update
//! ```

pub mod conditions;
pub mod crontab;
pub mod group;
pub mod persistence;
pub mod schedules;
pub mod timer;

pub use conditions::{CmpOp, Condition};
pub use group::GroupRunner;
pub use persistence::ScheduleStore;
pub use schedules::{Period, Schedule, ScheduleTask, Trigger};
pub use timer::{spawn_timer, ScheduleTimer};
