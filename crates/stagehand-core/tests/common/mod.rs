// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stagehand_core::{
    Direction, Mode, Orchestrator, Phase, PipelineEvent, PipelineTimings, Priority, Settings,
    TransferError, TransferHost, TransferOp, TransferRequest,
};
use tokio::sync::{broadcast, oneshot};

/// Wall-clock step per simulated tick; longer than every test delay.
pub const STEP: Duration = Duration::from_millis(16);

/// Settings with short delays so each deadline passes within one step.
pub fn settings() -> Settings {
    Settings {
        timings: PipelineTimings {
            settle: Duration::from_millis(10),
            throttle: Duration::from_millis(1),
        },
        event_capacity: 1024,
        core_bundles: Vec::new(),
    }
}

/// Manually advanced clock.
pub struct Clock {
    now: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
        }
    }

    pub fn step(&mut self) -> Instant {
        self.now += STEP;
        self.now
    }
}

/// Ticks until `done` holds, returning the number of ticks taken.
pub fn tick_until(
    orch: &mut Orchestrator,
    clock: &mut Clock,
    max_ticks: usize,
    mut done: impl FnMut(&Orchestrator) -> bool,
) -> Option<usize> {
    for n in 1..=max_ticks {
        orch.tick(clock.step());
        if done(orch) {
            return Some(n);
        }
    }
    None
}

/// Ticks `n` times.
pub fn tick_n(orch: &mut Orchestrator, clock: &mut Clock, n: usize) {
    for _ in 0..n {
        orch.tick(clock.step());
    }
}

/// Shared record of every transfer a host began.
#[derive(Clone, Default)]
pub struct TransferLog(Arc<Mutex<Vec<(Direction, String)>>>);

impl TransferLog {
    pub fn entries(&self) -> Vec<(Direction, String)> {
        self.0.lock().unwrap().clone()
    }

    pub fn bundles(&self, direction: Direction) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(d, _)| *d == direction)
            .map(|(_, b)| b)
            .collect()
    }

    fn record(&self, direction: Direction, request: &TransferRequest) {
        self.0
            .lock()
            .unwrap()
            .push((direction, request.bundle.as_str().to_owned()));
    }
}

/// Host whose transfers complete immediately, optionally failing some bundles.
#[derive(Default)]
pub struct InstantHost {
    pub log: TransferLog,
    pub failing: HashSet<String>,
}

impl InstantHost {
    pub fn new(log: &TransferLog) -> Self {
        Self {
            log: log.clone(),
            failing: HashSet::new(),
        }
    }

    pub fn failing(mut self, bundle: &str) -> Self {
        self.failing.insert(bundle.to_owned());
        self
    }
}

impl TransferHost for InstantHost {
    fn begin_transfer(&mut self, direction: Direction, request: &TransferRequest) -> TransferOp {
        self.log.record(direction, request);
        if self.failing.contains(request.bundle.as_str()) {
            TransferOp::failed(TransferError::Failed(format!(
                "{} is corrupt",
                request.bundle
            )))
        } else {
            TransferOp::ready()
        }
    }
}

/// Releases transfers held by a [`GatedHost`].
#[derive(Clone, Default)]
pub struct Gate {
    open: Arc<AtomicBool>,
    waiting: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
    dropped: Arc<Mutex<usize>>,
}

impl Gate {
    /// Completes every held transfer; later transfers complete immediately.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        for tx in self.waiting.lock().unwrap().drain(..) {
            if tx.send(()).is_err() {
                *self.dropped.lock().unwrap() += 1;
            }
        }
    }

    /// Transfers whose operation was dropped before being released.
    pub fn dropped(&self) -> usize {
        *self.dropped.lock().unwrap()
    }
}

/// Host whose transfers stay pending until its [`Gate`] opens.
pub struct GatedHost {
    pub log: TransferLog,
    pub gate: Gate,
}

impl TransferHost for GatedHost {
    fn begin_transfer(&mut self, direction: Direction, request: &TransferRequest) -> TransferOp {
        self.log.record(direction, request);
        if self.gate.open.load(Ordering::SeqCst) {
            return TransferOp::ready();
        }
        let (tx, rx) = oneshot::channel();
        self.gate.waiting.lock().unwrap().push(tx);
        TransferOp::new(async move { rx.await.map_err(|_| TransferError::Aborted) })
    }
}

/// Drains every event currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Phases entered by `direction`, in order.
pub fn phases(events: &[PipelineEvent], direction: Direction) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::PhaseChanged { direction: d, phase } if *d == direction => Some(*phase),
            _ => None,
        })
        .collect()
}

/// Plain application mode with a fixed priority.
pub struct AppMode {
    pub priority: Priority,
    pub name: &'static str,
}

impl Mode for AppMode {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Application mode that outranks the Loading mode.
pub struct Cutscene;

impl Mode for Cutscene {
    fn priority(&self) -> Priority {
        20_000
    }

    fn name(&self) -> &'static str {
        "cutscene"
    }

    fn persistent(&self) -> bool {
        true
    }
}
