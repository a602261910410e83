//! Process management module.
//!
//! This module renders the config files consumed by the ledger and node
//! processes, and starts and reaps those processes on the local machine.

pub mod types;
pub mod config_file;
pub mod launcher;

// Re-export commonly used items for convenience
pub use types::ProcessType;
pub use config_file::{render_ledger_config, render_node_config, write_config_files};
pub use launcher::LocalLauncher;
