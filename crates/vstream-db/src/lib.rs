//! Coordination store for the encode pipeline.
//!
//! Holds videos, their encoded variants and the in-flight encode markers that
//! crash recovery scans. [`PgStore`] is the production implementation;
//! [`MemoryStore`] backs tests and single-node development.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use postgres::{DbConfig, PgStore};
pub use store::{CoordinationStore, JobTally};
