// =============================================================================
// Polling Scheduler — periodic refresh with window-driven rescheduling
// =============================================================================
//
//   Idle ──start──▶ Running ──cycle done──▶ Armed ──timer──▶ Running ...
//                     ▲                       │
//                     └──── change_window ────┘
//   any ──stop──▶ Idle (an in-flight cycle finishes first)
//
// One driver task per started scheduler. The task is the only place cycles
// run, so two cycles can never overlap, and its single `Option` deadline is
// the only pending timer.
//
// Commands that arrive while a cycle is in flight wait in the channel. When
// the cycle ends they are drained and coalesced: a window change produces one
// immediate follow-up cycle with the latest window, a stop ends the task.
//
// A stopping driver stays registered until it exits. A driver started in
// that gap waits for the exit before its first cycle, and only a driver's own
// exit path marks the scheduler Idle.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::SymbolCatalog;
use crate::policy::IntervalPolicy;
use crate::refresh::orchestrator::{CycleReport, RefreshOrchestrator};
use crate::types::ObservationWindow;

// =============================================================================
// Polling state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPhase {
    /// No timer armed, no driver running.
    Idle,
    /// A refresh cycle is executing.
    Running,
    /// Waiting for the refresh timer.
    Armed,
}

/// The single pending refresh timer.
#[derive(Debug, Clone, Serialize)]
pub struct PendingTimer {
    #[serde(skip)]
    pub deadline: Instant,
    #[serde(serialize_with = "serialize_secs")]
    pub period: Duration,
    pub fires_at: DateTime<Utc>,
}

impl PendingTimer {
    fn arm(period: Duration) -> Self {
        Self {
            deadline: Instant::now() + period,
            period,
            fires_at: Utc::now()
                + chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }
}

/// Scheduler-owned view of the polling loop.
#[derive(Debug, Clone, Serialize)]
pub struct PollingState {
    pub window: ObservationWindow,
    pub phase: SchedulerPhase,
    pub pending_timer: Option<PendingTimer>,
    pub cycle_in_progress: bool,
    pub cycles_completed: u64,
    pub last_cycle: Option<CycleReport>,
}

impl PollingState {
    fn idle(window: ObservationWindow) -> Self {
        Self {
            window,
            phase: SchedulerPhase::Idle,
            pending_timer: None,
            cycle_in_progress: false,
            cycles_completed: 0,
            last_cycle: None,
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug)]
enum Command {
    ChangeWindow(ObservationWindow),
    Stop,
}

/// Handle to one spawned driver task.
struct Driver {
    commands: mpsc::UnboundedSender<Command>,
    /// Closed when the driver task has fully exited.
    exited: watch::Receiver<()>,
    /// A stop was sent; the task may still be finishing its cycle.
    stopping: bool,
}

impl Driver {
    fn is_finished(&self) -> bool {
        self.exited.has_changed().is_err()
    }

    /// Accepts commands: alive and not told to stop.
    fn is_active(&self) -> bool {
        !self.stopping && !self.is_finished()
    }
}

/// Resolves once the driver behind `exited` has exited.
async fn wait_exited(mut exited: watch::Receiver<()>) {
    while exited.changed().await.is_ok() {}
}

struct Shared {
    orchestrator: Arc<RefreshOrchestrator>,
    catalog: Arc<SymbolCatalog>,
    state: Arc<RwLock<PollingState>>,
    driver: Mutex<Option<Driver>>,
}

/// Owns the refresh timer and decides when cycles run.
///
/// Cloning yields another handle to the same scheduler. When the last handle
/// is dropped the command channel closes and the driver exits after any
/// in-flight cycle.
#[derive(Clone)]
pub struct PollingScheduler {
    shared: Arc<Shared>,
}

impl PollingScheduler {
    pub fn new(
        orchestrator: Arc<RefreshOrchestrator>,
        catalog: Arc<SymbolCatalog>,
        initial_window: ObservationWindow,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                orchestrator,
                catalog,
                state: Arc::new(RwLock::new(PollingState::idle(initial_window))),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Begin polling: one cycle immediately, then every refresh period.
    ///
    /// Calling `start` on an already running scheduler behaves like
    /// [`change_window`](Self::change_window). If a stop is still draining
    /// the previous driver, the new driver waits for it to exit before its
    /// first cycle.
    pub fn start(&self, window: ObservationWindow) {
        let mut driver = self.shared.driver.lock();

        if driver.as_ref().map_or(false, Driver::is_active) {
            drop(driver);
            warn!(window = %window, "scheduler already running — treating start as window change");
            self.change_window(window);
            return;
        }

        let predecessor = driver
            .as_ref()
            .filter(|d| !d.is_finished())
            .map(|d| d.exited.clone());

        {
            let mut state = self.shared.state.write();
            state.window = window;
            if predecessor.is_none() {
                state.phase = SchedulerPhase::Running;
                state.pending_timer = None;
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (exited_tx, exited_rx) = watch::channel(());
        let waiting = predecessor.is_some();
        tokio::spawn(drive(
            self.shared.orchestrator.clone(),
            self.shared.catalog.clone(),
            self.shared.state.clone(),
            rx,
            predecessor,
            exited_tx,
        ));
        *driver = Some(Driver {
            commands: tx,
            exited: exited_rx,
            stopping: false,
        });

        info!(
            window = %window,
            symbols = self.shared.catalog.len(),
            waiting_for_previous = waiting,
            "polling scheduler started"
        );
    }

    /// Switch observation window: cancel the pending timer, refresh
    /// immediately with the new window and re-arm with its period.
    ///
    /// An in-flight cycle is never interrupted; the follow-up cycle runs as
    /// soon as it finishes. On an idle or stopping scheduler this starts
    /// polling.
    pub fn change_window(&self, window: ObservationWindow) {
        let driver = self.shared.driver.lock();
        let sent = match driver.as_ref() {
            Some(active) if active.is_active() => {
                self.shared.state.write().window = window;
                active.commands.send(Command::ChangeWindow(window)).is_ok()
            }
            _ => false,
        };
        drop(driver);

        if sent {
            info!(window = %window, "observation window change requested");
        } else {
            self.start(window);
        }
    }

    /// Stop polling. Cancels the pending timer and waits for an in-flight
    /// cycle to finish; no further cycle is scheduled.
    ///
    /// The driver stays registered until it has exited, so a `start` or
    /// `change_window` issued meanwhile queues behind it instead of running
    /// alongside it.
    pub async fn stop(&self) {
        let exited = {
            let mut driver = self.shared.driver.lock();
            match driver.as_mut() {
                Some(d) if !d.is_finished() => {
                    let _ = d.commands.send(Command::Stop);
                    d.stopping = true;
                    d.exited.clone()
                }
                _ => {
                    debug!("stop requested on idle scheduler");
                    return;
                }
            }
        };

        wait_exited(exited).await;
        info!("polling scheduler stopped");
    }

    pub fn state(&self) -> PollingState {
        self.shared.state.read().clone()
    }

    pub fn window(&self) -> ObservationWindow {
        self.shared.state.read().window
    }
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("PollingScheduler")
            .field("window", &state.window)
            .field("phase", &state.phase)
            .field("cycles_completed", &state.cycles_completed)
            .finish()
    }
}

// =============================================================================
// Driver task
// =============================================================================

/// What woke the driver while armed.
enum Wake {
    Timer,
    WindowChanged(ObservationWindow),
    Stop,
}

async fn drive(
    orchestrator: Arc<RefreshOrchestrator>,
    catalog: Arc<SymbolCatalog>,
    state: Arc<RwLock<PollingState>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    predecessor: Option<watch::Receiver<()>>,
    _exited: watch::Sender<()>,
) {
    if let Some(previous) = predecessor {
        wait_exited(previous).await;
        // Window changes are already reflected in the shared state.
        if let Some(Wake::Stop) = drain_pending(&mut commands) {
            debug!("scheduler driver stopped before its first cycle");
            return;
        }
    }

    loop {
        // ── Running ─────────────────────────────────────────────────────
        let policy = {
            let mut s = state.write();
            s.phase = SchedulerPhase::Running;
            s.cycle_in_progress = true;
            s.pending_timer = None;
            IntervalPolicy::for_window(s.window)
        };

        let report = orchestrator.run_cycle(&catalog, &policy).await;

        {
            let mut s = state.write();
            s.cycle_in_progress = false;
            s.cycles_completed += 1;
            s.last_cycle = Some(report);
        }

        // ── Commands queued during the cycle ────────────────────────────
        match drain_pending(&mut commands) {
            Some(Wake::Stop) => break,
            Some(Wake::WindowChanged(window)) => {
                state.write().window = window;
                info!(window = %window, "window changed during cycle — refreshing now");
                continue;
            }
            Some(Wake::Timer) | None => {}
        }

        // ── Armed: period read from the window as it is now ─────────────
        let deadline = {
            let mut s = state.write();
            let period = IntervalPolicy::for_window(s.window).refresh_period;
            if let Some(last) = s.last_cycle.as_ref() {
                if last.elapsed > period {
                    warn!(
                        elapsed_ms = last.elapsed.as_millis() as u64,
                        period_secs = period.as_secs(),
                        "refresh cycle outlasted the refresh period"
                    );
                }
            }
            let timer = PendingTimer::arm(period);
            let deadline = timer.deadline;
            s.phase = SchedulerPhase::Armed;
            s.pending_timer = Some(timer);
            debug!(window = %s.window, period_secs = period.as_secs(), "refresh timer armed");
            deadline
        };

        let wake = tokio::select! {
            biased;
            cmd = commands.recv() => match cmd {
                Some(Command::ChangeWindow(window)) => {
                    // Later queued commands supersede this one.
                    drain_pending(&mut commands).unwrap_or(Wake::WindowChanged(window))
                }
                Some(Command::Stop) | None => Wake::Stop,
            },
            _ = tokio::time::sleep_until(deadline) => Wake::Timer,
        };

        match wake {
            Wake::Stop => break,
            Wake::WindowChanged(window) => {
                state.write().window = window;
                info!(window = %window, "refresh timer cancelled — window changed");
            }
            Wake::Timer => debug!("refresh timer fired"),
        }
    }

    let mut s = state.write();
    s.phase = SchedulerPhase::Idle;
    s.pending_timer = None;
    s.cycle_in_progress = false;
    debug!("scheduler driver exited");
}

/// Consume every queued command without waiting. A stop wins over window
/// changes; among window changes the latest wins.
fn drain_pending(commands: &mut mpsc::UnboundedReceiver<Command>) -> Option<Wake> {
    let mut wake = None;
    loop {
        match commands.try_recv() {
            Ok(Command::ChangeWindow(window)) => wake = Some(Wake::WindowChanged(window)),
            Ok(Command::Stop) => return Some(Wake::Stop),
            Err(mpsc::error::TryRecvError::Empty) => return wake,
            Err(mpsc::error::TryRecvError::Disconnected) => return Some(Wake::Stop),
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

// =============================================================================
// Tests
// =============================================================================
