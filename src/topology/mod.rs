//! Network topology module.
//!
//! The builder proposes which nodes should connect; the graph records the
//! connections the orchestrator actually established.

pub mod builder;
pub mod graph;

pub use builder::{TopologyBuilder, TopologyError};
pub use graph::{ConnectionGraph, Edge};
