//! Check-in session and arrival geofence
//!
//! The Geofence owns the single active check-in session and the device
//! position watcher. It turns fixes into live distance/bearing readouts,
//! prompts for arrival confirmation inside the arrival radius, and enforces
//! the cooldown after a denied prompt.
//!
//! All transitions take an explicit `now` so the machine runs the same under
//! a real clock and in tests. Handlers return the events to surface instead
//! of publishing them.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::types::{Coordinate, LocationId};
use crate::error::PositioningError;
use crate::io::positioning::{PositionFix, Positioning, WatchHandle, WatchOptions};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Distance at which arrival confirmation is offered
pub const ARRIVAL_RADIUS_M: f64 = 10.0;
/// How long a denied prompt suppresses the next one
pub const DENIAL_COOLDOWN: Duration = Duration::from_secs(30);
/// Age after which the last fix is reported as stale
pub const FIX_STALE_AFTER: Duration = Duration::from_secs(5);
/// Cadence of timer and fix countdown readouts
pub const READOUT_CADENCE: Duration = Duration::from_secs(1);

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Pluggable distance so tests and other map projections can substitute
pub trait DistanceModel: Send + Sync {
    fn distance_m(&self, from: Coordinate, to: Coordinate) -> f64;
}

/// Great-circle distance on a spherical earth
#[derive(Debug, Default, Clone, Copy)]
pub struct Haversine;

impl DistanceModel for Haversine {
    fn distance_m(&self, from: Coordinate, to: Coordinate) -> f64 {
        let d_lat = (to.lat - from.lat).to_radians();
        let d_lon = (to.lon - from.lon).to_radians();
        let lat1 = from.lat.to_radians();
        let lat2 = to.lat.to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

/// Initial bearing from `from` towards `to`, degrees clockwise from north in [0, 360)
pub fn bearing_deg(from: Coordinate, to: Coordinate) -> f64 {
    let d_lon = (to.lon - from.lon).to_radians();
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Eight-point compass rose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Compass {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Compass {
    const ROSE: [Compass; 8] =
        [Compass::N, Compass::NE, Compass::E, Compass::SE, Compass::S, Compass::SW, Compass::W, Compass::NW];

    pub fn from_bearing(bearing_deg: f64) -> Self {
        let index = (bearing_deg / 45.0).round() as i64;
        Self::ROSE[index.rem_euclid(8) as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compass::N => "N",
            Compass::NE => "NE",
            Compass::E => "E",
            Compass::SE => "SE",
            Compass::S => "S",
            Compass::SW => "SW",
            Compass::W => "W",
            Compass::NW => "NW",
        }
    }
}

impl std::fmt::Display for Compass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The location a check-in is heading for
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub id: LocationId,
    pub name: String,
    pub coords: Coordinate,
}

/// Distance/bearing display for the active session
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LiveReadout {
    AwaitingFix,
    Tracking { distance_m: f64, bearing_deg: f64, compass: Compass },
    GpsError { error: PositioningError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FixFreshness {
    Fresh { remaining_secs: u64 },
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PositioningStatus {
    Acquiring,
    Active,
    Unsupported,
    Failed { error: PositioningError },
}

/// Something the session wants surfaced to the user
#[derive(Debug, Clone, PartialEq)]
pub enum GeofenceEvent {
    Readout(LiveReadout),
    TimerTick { elapsed: Duration },
    FixCountdown(FixFreshness),
    ArrivalPrompt { target: LocationId, distance_m: f64 },
    Positioning(PositioningStatus),
}

/// Externally visible session phase. `Cooldown` is `Waiting` with an
/// active denial cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    AwaitingFix,
    Waiting,
    Cooldown,
    PendingConfirmation,
    Saving,
    SaveFailed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SessionState {
    AwaitingFix,
    Waiting,
    PendingConfirmation,
    /// Wait is frozen when the save starts so a retry records the same value
    Saving { wait: Duration },
    SaveFailed { wait: Duration },
}

impl SessionState {
    /// States in which fixes still drive the readout
    fn is_tracking(self) -> bool {
        matches!(self, SessionState::AwaitingFix | SessionState::Waiting | SessionState::PendingConfirmation)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CheckInSession {
    pub(crate) target: Target,
    pub(crate) started_at: Instant,
    pub(crate) state: SessionState,
    pub(crate) cooldown_until: Option<Instant>,
    /// Timer readout is paused while a prompt is pending
    pub(crate) readout_running: bool,
}

impl CheckInSession {
    fn cooldown_active(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchState {
    Idle,
    /// Registered but no fix yet
    Acquiring(WatchHandle),
    Active(WatchHandle),
    Failed(PositioningError),
}

impl WatchState {
    fn handle(self) -> Option<WatchHandle> {
        match self {
            WatchState::Acquiring(h) | WatchState::Active(h) => Some(h),
            WatchState::Idle | WatchState::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimedFix {
    pub(crate) fix: PositionFix,
    pub(crate) at: Instant,
}

/// Result of finishing a session with the save intent
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub target: Target,
    pub wait: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    /// Caller must persist, then report back via `save_succeeded`/`save_failed`
    Save(Completion),
    Discarded { elapsed: Duration },
}

/// Check-in session plus position watcher
pub struct Geofence<P> {
    pub(crate) positioning: P,
    pub(crate) watch_options: WatchOptions,
    pub(crate) watch: WatchState,
    /// Survives sessions and watcher failures; applied at session start
    pub(crate) last_fix: Option<TimedFix>,
    pub(crate) session: Option<CheckInSession>,
    pub(crate) distance: Box<dyn DistanceModel>,
}

impl<P: Positioning> Geofence<P> {
    pub fn new(positioning: P, watch_options: WatchOptions) -> Self {
        Self {
            positioning,
            watch_options,
            watch: WatchState::Idle,
            last_fix: None,
            session: None,
            distance: Box::new(Haversine),
        }
    }

    pub fn with_distance_model(mut self, model: impl DistanceModel + 'static) -> Self {
        self.distance = Box::new(model);
        self
    }

    pub fn phase(&self, now: Instant) -> Phase {
        let Some(session) = &self.session else {
            return Phase::Idle;
        };
        match session.state {
            SessionState::AwaitingFix => Phase::AwaitingFix,
            SessionState::Waiting if session.cooldown_active(now) => Phase::Cooldown,
            SessionState::Waiting => Phase::Waiting,
            SessionState::PendingConfirmation => Phase::PendingConfirmation,
            SessionState::Saving { .. } => Phase::Saving,
            SessionState::SaveFailed { .. } => Phase::SaveFailed,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        self.session.as_ref().map(|s| &s.target)
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Elapsed time of the active session; keeps counting while paused
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.session.as_ref().map(|s| now.saturating_duration_since(s.started_at))
    }

    pub fn watch_handle(&self) -> Option<WatchHandle> {
        self.watch.handle()
    }

    pub fn positioning_status(&self) -> Option<PositioningStatus> {
        match self.watch {
            WatchState::Idle => None,
            WatchState::Acquiring(_) => Some(PositioningStatus::Acquiring),
            WatchState::Active(_) => Some(PositioningStatus::Active),
            WatchState::Failed(PositioningError::Unsupported) => Some(PositioningStatus::Unsupported),
            WatchState::Failed(error) => Some(PositioningStatus::Failed { error }),
        }
    }

    pub fn last_fix(&self) -> Option<PositionFix> {
        self.last_fix.map(|t| t.fix)
    }

    fn readout_for(&self, fix: &PositionFix, target: &Target) -> LiveReadout {
        let distance_m = self.distance.distance_m(fix.coords, target.coords);
        let bearing = bearing_deg(fix.coords, target.coords);
        LiveReadout::Tracking { distance_m, bearing_deg: bearing, compass: Compass::from_bearing(bearing) }
    }
}
