//! Cycle scheduler: drives one compiled playlist forward in real time.
//!
//! ```text
//!   Idle ──start──▶ Active ──stop / window closed──▶ Stopped
//!                     │  ▲                             │
//!                     └──┘ advance, skip_to_asset      └──start──▶ Active
//! ```
//!
//! The scheduler owns its two timers as deadlines: a one-shot advance
//! deadline for the asset on screen and a recurring window re-check. Nothing
//! fires unless the owner awaits [`CycleScheduler::tick`], so a stopped
//! scheduler can never advance and no two advances overlap.

use chrono::{DateTime, Utc};
use signage_proto::model::{PlaylistCycle, WebviewAsset};
use signage_proto::schedule::{playlist_status, PlaylistStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shortest time an asset stays on screen, so zero-length assets cannot spin.
pub const MIN_DWELL: Duration = Duration::from_secs(1);

pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Wall clock used for active-window decisions.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// The presentation boundary.
pub trait Presenter: Send {
    /// `asset` is now due for its full `duration_secs`.
    fn present(&mut self, cycle_id: &str, asset: &WebviewAsset, duration_secs: u64);

    fn error(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Active,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Nothing to present; the scheduler stays inert.
    Empty,
    /// Outside the active window. Carries the reason for the caller to show.
    Inactive(PlaylistStatus),
    AlreadyActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// The advance timer fired and the asset at this index is now current.
    Advanced(usize),
    /// The window is still open.
    Rechecked,
    /// The window closed and the scheduler stopped itself.
    WindowClosed(PlaylistStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    WindowClosed(PlaylistStatus),
    NotStarted(StartOutcome),
}

pub struct CycleScheduler<P> {
    cycle: PlaylistCycle,
    presenter: P,
    clock: Clock,
    state: CycleState,
    index: usize,
    advance_at: Option<Instant>,
    recheck_at: Option<Instant>,
    recheck_interval: Duration,
}

impl<P: Presenter> CycleScheduler<P> {
    pub fn new(cycle: PlaylistCycle, presenter: P) -> Self {
        Self {
            cycle,
            presenter,
            clock: system_clock(),
            state: CycleState::Idle,
            index: 0,
            advance_at: None,
            recheck_at: None,
            recheck_interval: DEFAULT_RECHECK_INTERVAL,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    pub fn cycle(&self) -> &PlaylistCycle {
        &self.cycle
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_asset(&self) -> Option<&WebviewAsset> {
        self.cycle.assets.get(self.index)
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    /// Window status of this cycle right now.
    pub fn status(&self) -> PlaylistStatus {
        playlist_status(self.cycle.start, self.cycle.end, (self.clock)())
    }

    pub fn has_pending_timers(&self) -> bool {
        self.advance_at.is_some() || self.recheck_at.is_some()
    }

    /// Begin presenting at the current index.
    pub fn start(&mut self) -> StartOutcome {
        if self.state == CycleState::Active {
            return StartOutcome::AlreadyActive;
        }
        if self.cycle.is_empty() {
            info!("Cycle {} has no assets, not starting", self.cycle.id);
            return StartOutcome::Empty;
        }

        let status = self.status();
        if status != PlaylistStatus::Active {
            info!("Cycle {} not started: {:?}", self.cycle.id, status);
            return StartOutcome::Inactive(status);
        }

        info!(
            "Cycle {} ({}) starting: {} assets, {}s per loop",
            self.cycle.id,
            self.cycle.name,
            self.cycle.len(),
            self.cycle.total_duration_secs
        );
        self.state = CycleState::Active;
        self.recheck_at = Some(Instant::now() + self.recheck_interval);
        self.present_current();
        StartOutcome::Started
    }

    /// Move to the next asset, wrapping past the end. `None` unless active.
    pub fn advance(&mut self) -> Option<usize> {
        if self.state != CycleState::Active {
            return None;
        }
        self.advance_at = None;
        self.index = (self.index + 1) % self.cycle.len();
        self.present_current();
        Some(self.index)
    }

    /// Clear both timers. Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        self.advance_at = None;
        self.recheck_at = None;
        if self.state == CycleState::Active {
            info!("Cycle {} stopped at index {}", self.cycle.id, self.index);
            self.state = CycleState::Stopped;
        }
    }

    /// Jump straight to `asset_id`. While active the asset is presented at
    /// once; otherwise the next `start` begins there. Unknown ids change
    /// nothing and return `false`.
    pub fn skip_to_asset(&mut self, asset_id: &str) -> bool {
        let Some(position) = self.cycle.position_of(asset_id) else {
            debug!("Cycle {}: skip to unknown asset {}", self.cycle.id, asset_id);
            return false;
        };

        self.index = position;
        if self.state == CycleState::Active {
            self.advance_at = None;
            self.present_current();
        }
        true
    }

    /// Wait for the next timer and apply it. Pending forever while no timer
    /// is armed, which makes it safe inside `select!`.
    pub async fn tick(&mut self) -> Tick {
        let deadline = match (self.advance_at, self.recheck_at) {
            (Some(a), Some(r)) => a.min(r),
            (Some(a), None) => a,
            (None, Some(r)) => r,
            (None, None) => return std::future::pending().await,
        };
        tokio::time::sleep_until(deadline).await;

        let now = Instant::now();
        if self.recheck_at.is_some_and(|at| at <= now) {
            let status = self.status();
            if status != PlaylistStatus::Active {
                info!("Cycle {} left its active window: {:?}", self.cycle.id, status);
                self.stop();
                return Tick::WindowClosed(status);
            }
            self.recheck_at = Some(now + self.recheck_interval);
            if !self.advance_at.is_some_and(|at| at <= now) {
                return Tick::Rechecked;
            }
        }

        match self.advance() {
            Some(index) => Tick::Advanced(index),
            None => Tick::Rechecked,
        }
    }

    /// Start and keep the cycle going until shutdown or until the window
    /// closes.
    pub async fn run(&mut self, shutdown: CancellationToken) -> RunExit {
        match self.start() {
            StartOutcome::Started | StartOutcome::AlreadyActive => {}
            other => return RunExit::NotStarted(other),
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.stop();
                    return RunExit::Shutdown;
                }
                tick = self.tick() => {
                    if let Tick::WindowClosed(status) = tick {
                        return RunExit::WindowClosed(status);
                    }
                }
            }
        }
    }

    fn present_current(&mut self) {
        let Some(asset) = self.cycle.assets.get(self.index) else {
            return;
        };
        let duration = asset.duration_secs;
        debug!(
            "Cycle {}: presenting {} ({}) for {}s",
            self.cycle.id, asset.id, asset.name, duration
        );
        self.presenter.present(&self.cycle.id, asset, duration);
        self.advance_at = Some(Instant::now() + Duration::from_secs(duration).max(MIN_DWELL));
    }
}
