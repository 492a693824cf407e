//! Lock manager, locker, and deadlock detection (spec §4.6).

pub mod graph;
pub mod locker;
pub mod manager;

pub use locker::{LockKey, LockMode, Locker};
pub use manager::LockManager;
