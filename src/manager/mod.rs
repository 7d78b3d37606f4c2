// Manager module - ORCHESTRATION
// Logging run loop, restart recovery, pairing and registry editing

mod error;
mod pairing;
mod runner;

pub use error::ManagerError;
pub use pairing::detected_ports;
pub use runner::{Manager, ManagerConfig, ManagerStats};
