//! Synthetic payment activity over a provisioned network.

pub mod activity;
pub mod types;

pub use activity::ActivityGenerator;
pub use types::{ActivityError, ActivityReport, ActivityTask};
