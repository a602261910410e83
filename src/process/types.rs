//! Process type definitions.
//!
//! This file contains type definitions for the external processes an lndev
//! run starts and later tears down.

/// Enum representing the kinds of processes a run manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    /// bitcoind regtest ledger
    Ledger,
    /// lnd payment node
    Node,
}

impl ProcessType {
    /// Get the string representation of the process type
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Ledger => "ledger",
            ProcessType::Node => "node",
        }
    }
}

impl std::fmt::Display for ProcessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
