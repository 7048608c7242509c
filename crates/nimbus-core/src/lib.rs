//! # Nimbus Core
//!
//! Shared foundation for the Nimbus cloud-resource management backend:
//! configuration, the error taxonomy, the machine (resource) model that the
//! scheduler selects targets from, and the audit event log that every state
//! transition is recorded to.

pub mod audit;
pub mod config;
pub mod error;
pub mod resources;

pub use audit::{AuditEvent, AuditLog, MemoryAuditLog};
pub use config::NimbusConfig;
pub use error::{NimbusError, Result};
pub use resources::{Machine, MachineInventory, MachineState};
