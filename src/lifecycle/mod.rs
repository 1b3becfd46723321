//! Peer session lifecycle and the restart policy

pub mod budget;
pub mod manager;

pub use budget::RestartBudget;
pub use manager::ConnectionLifecycleManager;
