//! Librato daemon library
//!
//! Watches an inbox directory, files tagged music into the library layout and
//! fetches missing album covers.
//!
//! This library exposes the daemon components for the binary and for testing.

pub mod config;
pub mod error;
pub mod pid;
pub mod supervisor;

// Re-export commonly used types for convenience
pub use config::LibratoConfig;
pub use error::{DaemonError, Result};
pub use pid::PidLock;
pub use supervisor::{DaemonOptions, DaemonState, DaemonSupervisor, ShutdownSignals};
