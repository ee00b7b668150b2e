//! In-memory TTL caching.

mod ttl;

pub use ttl::{spawn_sweep_task, EvictionMode, SweepHandle, TtlStore};
