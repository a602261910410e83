//! Activity type definitions.

use std::sync::Arc;

use crate::control::{ErrorKind, NodeHandle};
use crate::orchestrator::{RunOutcome, Stage};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ActivityError {
    #[error("activity can only start after a completed run, run ended in stage {0}")]
    RunNotComplete(Stage),

    #[error("activity needs at least 2 nodes, pool has {0}")]
    PoolTooSmall(usize),
}

/// A batch of synthetic payments over a finalized node pool
#[derive(Debug, Clone)]
pub struct ActivityTask {
    /// Number of payment attempts to make
    pub payments: usize,
    pub pool: Arc<[NodeHandle]>,
}

impl ActivityTask {
    /// Creates a task over `pool`.
    ///
    /// An empty batch is accepted for any pool; otherwise the pool needs two
    /// distinct nodes.
    pub fn new(payments: usize, pool: Arc<[NodeHandle]>) -> Result<Self, ActivityError> {
        if payments > 0 && pool.len() < 2 {
            return Err(ActivityError::PoolTooSmall(pool.len()));
        }
        Ok(Self { payments, pool })
    }

    /// Creates a task over the node pool of a finished run
    pub fn from_outcome(outcome: &RunOutcome, payments: usize) -> Result<Self, ActivityError> {
        if outcome.stage != Stage::Complete {
            return Err(ActivityError::RunNotComplete(outcome.stage));
        }
        Self::new(payments, Arc::clone(&outcome.nodes))
    }
}

/// Tally of one activity run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityReport {
    pub attempted: usize,
    pub settled: usize,
    pub invoice_failures: usize,
    pub payment_failures: usize,
}

impl ActivityReport {
    /// Attempts that did not settle
    pub fn skipped(&self) -> usize {
        self.invoice_failures + self.payment_failures
    }

    /// Skipped attempts tagged with `kind`
    pub fn failures(&self, kind: ErrorKind) -> usize {
        match kind {
            ErrorKind::Invoice => self.invoice_failures,
            ErrorKind::Payment => self.payment_failures,
            _ => 0,
        }
    }
}
