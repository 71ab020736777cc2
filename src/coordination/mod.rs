//! Partition, map and reduce coordination of a reconciliation run

pub mod coordinator;
pub mod key_store;
pub mod manifest;
pub mod partitioner;
pub mod pool;
pub mod reconciler;
pub mod scheduler;
pub mod worker;

pub use coordinator::{Coordinator, ReconcileConfigBuilder};
