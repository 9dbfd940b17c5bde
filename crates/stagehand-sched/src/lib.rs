// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stagehand Scheduler
//!
//! Fixed-interval tick driver for an [`Orchestrator`].

use std::future::Future;
use std::time::Duration;

use anyhow::{ensure, Result};
use stagehand_core::Orchestrator;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument};

/// Why [`Scheduler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Both pipelines went idle with nothing queued.
    Idle,
    /// The configured tick budget ran out.
    TickBudget,
    /// The shutdown future resolved.
    Shutdown,
}

/// Ticks an orchestrator at a fixed interval.
#[derive(Debug)]
pub struct Scheduler {
    interval: Duration,
    tick_count: u64,
    max_ticks: Option<u64>,
    stop_when_idle: bool,
}

impl Scheduler {
    /// Creates a scheduler that stops once the orchestrator is idle.
    pub fn new(interval: Duration) -> Result<Self> {
        ensure!(!interval.is_zero(), "tick interval must be non-zero");
        Ok(Self {
            interval,
            tick_count: 0,
            max_ticks: None,
            stop_when_idle: true,
        })
    }

    /// Stops after `ticks` ticks even if work remains.
    pub fn with_tick_budget(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    /// Keeps ticking while idle; only the budget or shutdown stop the loop.
    pub fn run_forever(mut self) -> Self {
        self.stop_when_idle = false;
        self
    }

    /// Ticks driven so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Runs the tick loop until idle, out of budget, or `shutdown` resolves.
    #[instrument(skip(self, orchestrator, shutdown), fields(interval = ?self.interval))]
    pub async fn run<F>(&mut self, orchestrator: &mut Orchestrator, shutdown: F) -> Result<StopReason>
    where
        F: Future<Output = ()>,
    {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("scheduler started");
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!(ticks = self.tick_count, "shutdown requested");
                    return Ok(StopReason::Shutdown);
                }
                now = interval.tick() => {
                    if let Some(reason) = self.tick(orchestrator, now.into_std()) {
                        info!(ticks = self.tick_count, ?reason, "scheduler stopped");
                        return Ok(reason);
                    }
                }
            }
        }
    }

    fn tick(&mut self, orchestrator: &mut Orchestrator, now: std::time::Instant) -> Option<StopReason> {
        self.tick_count += 1;
        orchestrator.tick(now);
        if self.tick_count.is_multiple_of(60) {
            debug!(tick = self.tick_count, idle = orchestrator.is_idle(), "tick");
        }
        if self.stop_when_idle && orchestrator.is_idle() {
            return Some(StopReason::Idle);
        }
        match self.max_ticks {
            Some(max) if self.tick_count >= max => Some(StopReason::TickBudget),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::{
        Direction, Settings, TransferHost, TransferMode, TransferOp, TransferRequest,
    };

    struct Immediate;

    impl TransferHost for Immediate {
        fn begin_transfer(&mut self, _: Direction, _: &TransferRequest) -> TransferOp {
            TransferOp::ready()
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Settings::default(), Immediate)
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Scheduler::new(Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_the_load_completes() {
        let mut orch = orchestrator();
        orch.request_load("level-1", TransferMode::Additive);
        let mut sched = Scheduler::new(Duration::from_millis(16)).unwrap();

        let reason = sched.run(&mut orch, std::future::pending()).await.unwrap();
        assert_eq!(reason, StopReason::Idle);
        assert_eq!(orch.loaded().len(), 1);
        assert!(sched.tick_count() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_budget_stops_a_stalled_run() {
        let mut orch = orchestrator();
        let flag = stagehand_core::ReadinessFlag::busy("never");
        orch.readiness_mut().register(std::sync::Arc::new(flag));
        orch.request_load("level-1", TransferMode::Additive);
        let mut sched = Scheduler::new(Duration::from_millis(16))
            .unwrap()
            .with_tick_budget(100);

        let reason = sched.run(&mut orch, std::future::pending()).await.unwrap();
        assert_eq!(reason, StopReason::TickBudget);
        assert_eq!(sched.tick_count(), 100);
        assert_eq!(
            orch.phase(Direction::Load),
            stagehand_core::Phase::AwaitingReadiness
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_shutdown_wins_over_ticks() {
        let mut orch = orchestrator();
        let mut sched = Scheduler::new(Duration::from_millis(16))
            .unwrap()
            .run_forever();
        let reason = sched.run(&mut orch, std::future::ready(())).await.unwrap();
        assert_eq!(reason, StopReason::Shutdown);
        assert_eq!(sched.tick_count(), 0);
    }
}
