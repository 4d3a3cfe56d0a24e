//! Transition handlers for the Geofence
//!
//! User intents (start, confirm, deny, finish) and device input (fixes,
//! errors, ticks) each get one handler. Intents are validated against the
//! current phase and rejected with a `SessionError` without side effects.

use super::{
    CheckInSession, Completion, FinishOutcome, FixFreshness, Geofence, GeofenceEvent, LiveReadout,
    PositioningStatus, SessionState, Target, TimedFix, WatchState, ARRIVAL_RADIUS_M,
    DENIAL_COOLDOWN, FIX_STALE_AFTER,
};
use crate::error::{PositioningError, SessionError};
use crate::io::positioning::{PositionFix, PositionUpdate, Positioning, WatchHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

impl<P: Positioning> Geofence<P> {
    /// Make sure a position watcher is running
    ///
    /// A watcher that already has a fix is left alone. One still waiting for
    /// its first fix is torn down and replaced, since it may be wedged.
    pub fn start_watcher(&mut self) -> Vec<GeofenceEvent> {
        match self.watch {
            WatchState::Active(handle) => {
                debug!(handle = %handle, "position_watch_already_active");
                return Vec::new();
            }
            WatchState::Acquiring(stale) => {
                self.positioning.clear_watch(stale);
                info!(handle = %stale, "position_watch_restarted");
            }
            WatchState::Idle | WatchState::Failed(_) => {}
        }

        match self.positioning.watch(&self.watch_options) {
            Ok(handle) => {
                self.watch = WatchState::Acquiring(handle);
                vec![GeofenceEvent::Positioning(PositioningStatus::Acquiring)]
            }
            Err(error) => {
                warn!(error = %error, "position_watch_failed");
                self.watch = WatchState::Failed(error);
                let status = match error {
                    PositioningError::Unsupported => PositioningStatus::Unsupported,
                    error => PositioningStatus::Failed { error },
                };
                vec![GeofenceEvent::Positioning(status)]
            }
        }
    }

    /// Begin a check-in towards `target`
    ///
    /// The last known fix, if any, is applied immediately so the readout does
    /// not wait for the next device update.
    pub fn start_check_in(
        &mut self,
        target: Option<Target>,
        now: Instant,
    ) -> Result<Vec<GeofenceEvent>, SessionError> {
        let target = target.ok_or(SessionError::NoTargetSelected)?;

        if let Some(existing) = &self.session {
            if matches!(existing.state, SessionState::Saving { .. }) {
                return Err(SessionError::SaveInProgress);
            }
            warn!(location_id = %existing.target.id, "check_in_replaced");
        }

        info!(location_id = %target.id, name = %target.name, "check_in_started");
        self.session = Some(CheckInSession {
            target,
            started_at: now,
            state: SessionState::AwaitingFix,
            cooldown_until: None,
            readout_running: true,
        });

        let mut events = self.start_watcher();
        match self.last_fix {
            Some(timed) => events.extend(self.apply_fix_to_session(timed.fix, now)),
            None => events.push(GeofenceEvent::Readout(LiveReadout::AwaitingFix)),
        }
        Ok(events)
    }

    /// Route a device update. Updates from a watch that has since been
    /// replaced or cleared are dropped.
    pub fn handle_update(&mut self, update: PositionUpdate, now: Instant) -> Vec<GeofenceEvent> {
        if self.watch.handle() != Some(update.handle()) {
            debug!(handle = %update.handle(), "stale_position_update");
            return Vec::new();
        }
        match update {
            PositionUpdate::Fix { handle, fix } => self.handle_fix(handle, fix, now),
            PositionUpdate::Error { handle, error } => self.handle_positioning_error(handle, error),
        }
    }

    fn handle_fix(&mut self, handle: WatchHandle, fix: PositionFix, now: Instant) -> Vec<GeofenceEvent> {
        let mut events = Vec::new();
        if matches!(self.watch, WatchState::Acquiring(_)) {
            info!(handle = %handle, "position_fix_acquired");
            events.push(GeofenceEvent::Positioning(PositioningStatus::Active));
        }
        self.watch = WatchState::Active(handle);
        self.last_fix = Some(TimedFix { fix, at: now });

        if self.session.as_ref().is_some_and(|s| s.state.is_tracking()) {
            events.push(GeofenceEvent::FixCountdown(FixFreshness::Fresh {
                remaining_secs: FIX_STALE_AFTER.as_secs(),
            }));
            events.extend(self.apply_fix_to_session(fix, now));
        }
        events
    }

    /// Update the readout and run the arrival check
    fn apply_fix_to_session(&mut self, fix: PositionFix, now: Instant) -> Vec<GeofenceEvent> {
        let Some(session) = &self.session else {
            return Vec::new();
        };
        if !session.state.is_tracking() {
            return Vec::new();
        }

        let readout = self.readout_for(&fix, &session.target);
        let mut events = vec![GeofenceEvent::Readout(readout)];

        let Some(session) = self.session.as_mut() else {
            return events;
        };
        if session.state == SessionState::AwaitingFix {
            session.state = SessionState::Waiting;
        }

        let LiveReadout::Tracking { distance_m, .. } = readout else {
            return events;
        };
        if distance_m > ARRIVAL_RADIUS_M || session.state != SessionState::Waiting {
            return events;
        }
        if session.cooldown_active(now) {
            debug!(location_id = %session.target.id, distance_m = distance_m, "arrival_in_cooldown");
            return events;
        }

        session.state = SessionState::PendingConfirmation;
        session.readout_running = false;
        info!(location_id = %session.target.id, distance_m = distance_m, "arrival_prompted");
        events.push(GeofenceEvent::ArrivalPrompt { target: session.target.id.clone(), distance_m });
        events
    }

    /// A failed watcher is cleared so the next start registers a new one.
    /// The session itself carries on.
    fn handle_positioning_error(&mut self, handle: WatchHandle, error: PositioningError) -> Vec<GeofenceEvent> {
        warn!(handle = %handle, error = %error, "positioning_error");
        self.positioning.clear_watch(handle);
        self.watch = WatchState::Failed(error);

        let mut events = vec![GeofenceEvent::Positioning(PositioningStatus::Failed { error })];
        if self.session.as_ref().is_some_and(|s| s.state.is_tracking()) {
            events.push(GeofenceEvent::Readout(LiveReadout::GpsError { error }));
        }
        events
    }

    /// Periodic readouts: elapsed timer and fix freshness
    pub fn tick(&mut self, now: Instant) -> Vec<GeofenceEvent> {
        let Some(session) = &self.session else {
            return Vec::new();
        };
        if !session.state.is_tracking() {
            return Vec::new();
        }

        let mut events = Vec::new();
        if session.readout_running {
            events.push(GeofenceEvent::TimerTick { elapsed: now.saturating_duration_since(session.started_at) });
        }
        if let Some(timed) = self.last_fix {
            let age = now.saturating_duration_since(timed.at);
            let freshness = match FIX_STALE_AFTER.checked_sub(age) {
                Some(left) if !left.is_zero() => {
                    FixFreshness::Fresh { remaining_secs: left.as_secs_f64().round() as u64 }
                }
                _ => FixFreshness::Stale,
            };
            events.push(GeofenceEvent::FixCountdown(freshness));
        }
        events
    }

    /// Accept the arrival prompt; the session moves to saving
    pub fn confirm_arrival(&mut self, now: Instant) -> Result<Completion, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NoActiveSession)?;
        if session.state != SessionState::PendingConfirmation {
            return Err(SessionError::NotPendingConfirmation);
        }
        match self.finish(true, now)? {
            FinishOutcome::Save(completion) => Ok(completion),
            FinishOutcome::Discarded { .. } => Err(SessionError::NoActiveSession),
        }
    }

    /// Reject the arrival prompt and suppress the next one for the cooldown
    pub fn deny_arrival(&mut self, now: Instant) -> Result<(), SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        if session.state != SessionState::PendingConfirmation {
            return Err(SessionError::NotPendingConfirmation);
        }
        session.state = SessionState::Waiting;
        session.cooldown_until = Some(now + DENIAL_COOLDOWN);
        session.readout_running = true;
        info!(location_id = %session.target.id, cooldown_secs = DENIAL_COOLDOWN.as_secs(), "arrival_denied");
        Ok(())
    }

    /// End the session
    ///
    /// Without `save` the session is dropped. With `save` the wait is
    /// measured from the start (including any paused time) and the session
    /// stays open in the saving phase until the caller reports the outcome.
    pub fn finish(&mut self, save: bool, now: Instant) -> Result<FinishOutcome, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoActiveSession)?;
        if matches!(session.state, SessionState::Saving { .. }) {
            return Err(SessionError::SaveInProgress);
        }
        let elapsed = now.saturating_duration_since(session.started_at);
        session.cooldown_until = None;
        session.readout_running = false;

        if !save {
            info!(location_id = %session.target.id, elapsed_ms = elapsed.as_millis() as u64, "check_in_discarded");
            self.session = None;
            return Ok(FinishOutcome::Discarded { elapsed });
        }

        let wait = match session.state {
            SessionState::SaveFailed { wait } => wait,
            _ => elapsed,
        };
        session.state = SessionState::Saving { wait };
        info!(location_id = %session.target.id, wait_ms = wait.as_millis() as u64, "check_in_saving");
        Ok(FinishOutcome::Save(Completion { target: session.target.clone(), wait }))
    }

    /// The save completed; the session ends
    pub fn save_succeeded(&mut self) -> Option<Target> {
        let session = self.session.take_if(|s| matches!(s.state, SessionState::Saving { .. }))?;
        info!(location_id = %session.target.id, "check_in_completed");
        Some(session.target)
    }

    /// The save failed; the session is kept so saving can be retried
    pub fn save_failed(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let SessionState::Saving { wait } = session.state {
            session.state = SessionState::SaveFailed { wait };
            warn!(location_id = %session.target.id, "check_in_save_failed");
        }
    }
}
