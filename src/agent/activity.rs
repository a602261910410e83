//! Synthetic payment activity.
//!
//! Runs a fixed number of payment attempts on a fixed cadence across the
//! node pool of a completed run. Each attempt picks a random payer and a
//! distinct random payee, has the payee mint an invoice for a random amount
//! and has the payer settle it. Failed attempts are counted and skipped;
//! nothing is retried.

use log::{debug, info, warn};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::types::{ActivityReport, ActivityTask};
use crate::config::ActivityConfig;
use crate::control::ErrorKind;

/// Drives an [`ActivityTask`] to completion
#[derive(Debug)]
pub struct ActivityGenerator {
    task: ActivityTask,
    interval: Duration,
    amounts: RangeInclusive<u64>,
    rng: ChaCha8Rng,
}

impl ActivityGenerator {
    pub fn new(task: ActivityTask, config: &ActivityConfig, rng: ChaCha8Rng) -> Self {
        Self {
            task,
            interval: config.interval,
            amounts: config.min_amount..=config.max_amount,
            rng,
        }
    }

    /// Picks a payer and a distinct payee uniformly from a pool of `n >= 2`
    fn pick_pair(&mut self, n: usize) -> (usize, usize) {
        let src = self.rng.gen_range(0..n);
        let mut dst = self.rng.gen_range(0..n - 1);
        if dst >= src {
            dst += 1;
        }
        (src, dst)
    }

    /// Runs every attempt and returns the tally
    pub async fn run(mut self) -> ActivityReport {
        let mut report = ActivityReport::default();
        let total = self.task.payments;
        if total == 0 {
            return report;
        }

        let pool = std::sync::Arc::clone(&self.task.pool);
        info!("Starting activity: {} payments across {} nodes", total, pool.len());

        for attempt in 1..=total {
            tokio::time::sleep(self.interval).await;
            report.attempted += 1;

            let (src, dst) = self.pick_pair(pool.len());
            let amount = self.rng.gen_range(self.amounts.clone());
            let (payer, payee) = (&pool[src], &pool[dst]);
            let memo = format!("random invoice from {}, to {}", payer.alias(), payee.alias());

            let request = match payee.control.create_invoice(amount, &memo).await {
                Ok(request) => request,
                Err(e) => {
                    warn!(
                        "error[{}]: Payment {}/{}: {} could not create invoice: {}",
                        ErrorKind::Invoice,
                        attempt,
                        total,
                        payee.alias(),
                        e
                    );
                    report.invoice_failures += 1;
                    continue;
                }
            };

            match payer.control.settle(&request).await {
                Ok(()) => {
                    debug!(
                        "Payment {}/{}: {} paid {} to {}",
                        attempt,
                        total,
                        payer.alias(),
                        amount,
                        payee.alias()
                    );
                    report.settled += 1;
                }
                Err(e) => {
                    warn!(
                        "error[{}]: Payment {}/{}: {} could not pay {}: {}",
                        ErrorKind::Payment,
                        attempt,
                        total,
                        payer.alias(),
                        payee.alias(),
                        e
                    );
                    report.payment_failures += 1;
                }
            }
        }

        info!(
            "Activity finished: {} attempted, {} settled, {} skipped",
            report.attempted,
            report.settled,
            report.skipped()
        );
        report
    }

    /// Runs the generator as an independent task
    pub fn spawn(self) -> JoinHandle<ActivityReport> {
        tokio::spawn(self.run())
    }
}
