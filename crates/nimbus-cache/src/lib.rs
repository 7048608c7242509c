//! # Nimbus Cache
//!
//! The cache & dedup layer of the task execution framework: a key-value
//! store addressed by a task fingerprint, holding the last successful
//! result, its timestamp, and the sequence id of the polling chain that
//! produced it, plus one error marker per fingerprint for backoff
//! bookkeeping.
//!
//! All operations are single-key read/replace with last-writer-wins
//! semantics — no cross-key transactions. Entries older than the reader's
//! retention window are treated as absent (logical expiry); physical
//! eviction is an implementation detail of the backing store.

pub mod entry;
pub mod store;

pub use entry::{CacheEntry, ErrorMarker, Fingerprint};
pub use store::{MemoryCache, ResultCache};
