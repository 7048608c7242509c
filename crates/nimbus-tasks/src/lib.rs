//! # Nimbus Tasks
//!
//! The task execution framework: wraps a unit of work, consults the cache &
//! dedup layer to avoid redundant execution, decides between synchronous and
//! queued execution, republishes results to the owner's session stream, and
//! re-enqueues polling-class tasks.
//!
//! ## Architecture
//! ```text
//! submit(task_key, owner, args, mode)
//!   ├── cache fresh  → return cached payload, no run
//!   ├── cache stale  → return cached payload + enqueue one refresh
//!   └── cache miss   → blocking: run inline / async: enqueue
//!
//! worker: run(envelope)
//!   ├── error-marker  seq check  → superseded chains terminate
//!   ├── backpressure  gate       → nobody listening, stop polling
//!   ├── cache         seq check  → superseded chains terminate
//!   ├── execute under soft time limit
//!   ├── ok   → clear errors, publish, cache, re-enqueue if polling
//!   └── err  → append to error marker, backoff policy → re-enqueue or stop
//! ```
//!
//! Concurrency is coordinated per fingerprint by the sequence-id
//! supersession rule, not by locks: racing attempts may both run, but only
//! the attempt whose sequence id is still current publishes and re-enqueues.

pub mod bus;
pub mod kinds;
pub mod provider;
pub mod queue;
pub mod runner;

pub use bus::{SessionBus, SessionMessage};
pub use kinds::{
    ListImages, ListLocations, ListMachines, ListSizes, MachineAction, Ping, ProbeSsh, RunScript,
    TaskContext, TaskKind, TaskRegistry,
};
pub use provider::{CloudProvider, DummyProvider};
pub use queue::{spawn_workers, MpscQueue, TaskEnvelope, WorkQueue};
pub use runner::{RunOutcome, SubmitMode, TaskRunner};
