//! Periodic balance loop
//!
//! Runs `LoadBalancer::run_balance_cycle` on a fixed interval until a shutdown
//! signal arrives. A failed cycle is logged and retried on the next tick.

use super::{CycleReport, LoadBalancer};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Control loop driving a `LoadBalancer`
pub struct BalanceLoop {
    balancer: Arc<LoadBalancer>,
    interval: Duration,
    cycles: u64,
}

impl BalanceLoop {
    pub fn new(balancer: Arc<LoadBalancer>, interval: Duration) -> Self {
        Self {
            balancer,
            interval,
            cycles: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `shutdown` fires; the first cycle starts immediately
    ///
    /// A cycle in progress when shutdown arrives runs to completion.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting balance loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.balancer.is_stop_requested() {
                        info!("Stop requested, leaving balance loop");
                        break;
                    }
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down balance loop");
                    self.balancer.request_stop();
                    break;
                }
            }
        }

        self.cycles
    }

    /// Run one cycle, absorbing cycle-level failures
    pub async fn tick(&mut self) -> Option<CycleReport> {
        self.cycles += 1;
        match self.balancer.run_balance_cycle().await {
            Ok(report) => {
                debug!(
                    cycle = self.cycles,
                    executed = report.executed().len(),
                    "Balance cycle finished"
                );
                Some(report)
            }
            Err(e) => {
                warn!(cycle = self.cycles, error = %e, "Balance cycle failed");
                None
            }
        }
    }
}

/// Builder for the balance loop
pub struct BalanceLoopBuilder {
    balancer: Option<Arc<LoadBalancer>>,
    interval: Option<Duration>,
}

impl BalanceLoopBuilder {
    pub fn new() -> Self {
        Self {
            balancer: None,
            interval: None,
        }
    }

    pub fn balancer(mut self, balancer: Arc<LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    /// Override the configured `check_interval_secs`
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<BalanceLoop> {
        let balancer = self
            .balancer
            .ok_or_else(|| anyhow::anyhow!("Balancer is required"))?;
        let interval = self
            .interval
            .unwrap_or_else(|| balancer.config().check_interval());
        if interval.is_zero() {
            anyhow::bail!("Balance interval must be positive");
        }
        Ok(BalanceLoop::new(balancer, interval))
    }
}

impl Default for BalanceLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
