//! Tests for the Geofence module

use super::*;
use crate::error::SessionError;
use crate::io::positioning::PositionUpdate;

/// Records watch registrations and clears
#[derive(Default)]
struct FakePositioning {
    next: u64,
    cleared: Vec<WatchHandle>,
    started: usize,
    fail_with: Option<PositioningError>,
}

impl Positioning for FakePositioning {
    fn watch(&mut self, _options: &WatchOptions) -> Result<WatchHandle, PositioningError> {
        if let Some(error) = self.fail_with {
            return Err(error);
        }
        self.next += 1;
        self.started += 1;
        Ok(WatchHandle(self.next))
    }

    fn clear_watch(&mut self, handle: WatchHandle) {
        self.cleared.push(handle);
    }
}

/// Distance is the latitude difference, so fixes can be placed at exact
/// distances from a target at the origin
struct LatDelta;

impl DistanceModel for LatDelta {
    fn distance_m(&self, from: Coordinate, to: Coordinate) -> f64 {
        (from.lat - to.lat).abs()
    }
}

fn geofence() -> Geofence<FakePositioning> {
    Geofence::new(FakePositioning::default(), WatchOptions::default()).with_distance_model(LatDelta)
}

fn target() -> Target {
    Target {
        id: LocationId::new("loc_clinic"),
        name: "Clinic".to_string(),
        coords: Coordinate { lat: 0.0, lon: 0.0 },
    }
}

fn fix_at(handle: WatchHandle, distance: f64) -> PositionUpdate {
    PositionUpdate::Fix { handle, fix: PositionFix::at(Coordinate { lat: distance, lon: 0.0 }) }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn has_prompt(events: &[GeofenceEvent]) -> bool {
    events.iter().any(|e| matches!(e, GeofenceEvent::ArrivalPrompt { .. }))
}

fn has_timer(events: &[GeofenceEvent]) -> bool {
    events.iter().any(|e| matches!(e, GeofenceEvent::TimerTick { .. }))
}

/// Started session with one fix far from the target
fn waiting(t0: Instant) -> (Geofence<FakePositioning>, WatchHandle) {
    let mut g = geofence();
    g.start_check_in(Some(target()), t0).unwrap();
    let handle = g.watch_handle().unwrap();
    g.handle_update(fix_at(handle, 50.0), t0 + secs(1));
    assert_eq!(g.phase(t0 + secs(1)), Phase::Waiting);
    (g, handle)
}

#[test]
fn test_start_requires_target() {
    let mut g = geofence();
    let now = Instant::now();

    assert_eq!(g.start_check_in(None, now), Err(SessionError::NoTargetSelected));
    assert_eq!(g.phase(now), Phase::Idle);
    assert_eq!(g.positioning.started, 0);
}

#[test]
fn test_start_without_fix_awaits_fix() {
    let mut g = geofence();
    let now = Instant::now();

    let events = g.start_check_in(Some(target()), now).unwrap();

    assert_eq!(g.phase(now), Phase::AwaitingFix);
    assert!(events.contains(&GeofenceEvent::Readout(LiveReadout::AwaitingFix)));
    assert!(events.contains(&GeofenceEvent::Positioning(PositioningStatus::Acquiring)));
}

#[test]
fn test_start_applies_last_known_fix() {
    let mut g = geofence();
    let t0 = Instant::now();
    g.start_watcher();
    let handle = g.watch_handle().unwrap();
    g.handle_update(fix_at(handle, 30.0), t0);

    let events = g.start_check_in(Some(target()), t0 + secs(2)).unwrap();

    assert_eq!(g.phase(t0 + secs(2)), Phase::Waiting);
    assert!(events.iter().any(|e| matches!(
        e,
        GeofenceEvent::Readout(LiveReadout::Tracking { distance_m, .. }) if *distance_m == 30.0
    )));
}

#[test]
fn test_arrival_prompt_pauses_readout() {
    let t0 = Instant::now();
    let (mut g, handle) = waiting(t0);

    let events = g.handle_update(fix_at(handle, 8.0), t0 + secs(2));

    assert!(has_prompt(&events));
    assert_eq!(g.phase(t0 + secs(2)), Phase::PendingConfirmation);
    assert!(!has_timer(&g.tick(t0 + secs(3))));

    // further fixes inside the radius do not prompt again
    let again = g.handle_update(fix_at(handle, 4.0), t0 + secs(3));
    assert!(!has_prompt(&again));
}

#[test]
fn test_exact_radius_triggers_prompt() {
    let t0 = Instant::now();
    let (mut g, handle) = waiting(t0);

    assert!(!has_prompt(&g.handle_update(fix_at(handle, 10.01), t0 + secs(2))));
    assert!(has_prompt(&g.handle_update(fix_at(handle, ARRIVAL_RADIUS_M), t0 + secs(3))));
}

#[test]
fn test_denial_cooldown_suppresses_prompt() {
    let t0 = Instant::now();
    let (mut g, handle) = waiting(t0);
    g.handle_update(fix_at(handle, 8.0), t0 + secs(2));

    let denied_at = t0 + secs(3);
    g.deny_arrival(denied_at).unwrap();
    assert_eq!(g.phase(denied_at), Phase::Cooldown);
    assert!(has_timer(&g.tick(denied_at + secs(1))));

    let during = g.handle_update(fix_at(handle, 5.0), denied_at + secs(10));
    assert!(!has_prompt(&during));
    assert_eq!(g.phase(denied_at + secs(10)), Phase::Cooldown);

    let after = g.handle_update(fix_at(handle, 5.0), denied_at + secs(31));
    assert!(has_prompt(&after));
    assert_eq!(g.phase(denied_at + secs(31)), Phase::PendingConfirmation);
}

#[test]
fn test_confirm_and_deny_require_pending_prompt() {
    let t0 = Instant::now();
    let mut g = geofence();
    assert_eq!(g.deny_arrival(t0), Err(SessionError::NoActiveSession));
    assert_eq!(g.confirm_arrival(t0), Err(SessionError::NoActiveSession));

    let (mut g, _) = waiting(t0);
    assert_eq!(g.deny_arrival(t0), Err(SessionError::NotPendingConfirmation));
    assert_eq!(g.confirm_arrival(t0), Err(SessionError::NotPendingConfirmation));
}

#[test]
fn test_confirm_measures_wait_from_start() {
    let t0 = Instant::now();
    let (mut g, handle) = waiting(t0);
    g.handle_update(fix_at(handle, 3.0), t0 + secs(60));

    // paused for a while before confirming
    let completion = g.confirm_arrival(t0 + secs(90)).unwrap();

    assert_eq!(completion.wait, secs(90));
    assert_eq!(completion.target, target());
    assert_eq!(g.phase(t0 + secs(90)), Phase::Saving);
}

#[test]
fn test_saving_rejects_second_finish() {
    let t0 = Instant::now();
    let (mut g, _) = waiting(t0);
    g.finish(true, t0 + secs(20)).unwrap();

    assert_eq!(g.finish(true, t0 + secs(21)), Err(SessionError::SaveInProgress));
    assert_eq!(g.finish(false, t0 + secs(21)), Err(SessionError::SaveInProgress));
    assert_eq!(g.start_check_in(Some(target()), t0 + secs(21)), Err(SessionError::SaveInProgress));
}

#[test]
fn test_failed_save_keeps_session_and_wait() {
    let t0 = Instant::now();
    let (mut g, handle) = waiting(t0);
    g.finish(true, t0 + secs(20)).unwrap();

    g.save_failed();
    assert_eq!(g.phase(t0 + secs(25)), Phase::SaveFailed);
    assert!(g.has_session());

    // fixes no longer drive the session
    assert!(!has_prompt(&g.handle_update(fix_at(handle, 1.0), t0 + secs(26))));

    let FinishOutcome::Save(retry) = g.finish(true, t0 + secs(40)).unwrap() else {
        panic!("expected save outcome");
    };
    assert_eq!(retry.wait, secs(20));

    assert_eq!(g.save_succeeded(), Some(target()));
    assert_eq!(g.phase(t0 + secs(41)), Phase::Idle);
}

#[test]
fn test_finish_without_save_discards() {
    let t0 = Instant::now();
    let (mut g, handle) = waiting(t0);

    let outcome = g.finish(false, t0 + secs(12)).unwrap();

    assert_eq!(outcome, FinishOutcome::Discarded { elapsed: secs(12) });
    assert_eq!(g.phase(t0 + secs(12)), Phase::Idle);
    assert_eq!(g.save_succeeded(), None);

    // a late fix has nothing to prompt for
    assert!(!has_prompt(&g.handle_update(fix_at(handle, 1.0), t0 + secs(13))));
}

#[test]
fn test_positioning_error_degrades_readout() {
    let t0 = Instant::now();
    let (mut g, handle) = waiting(t0);

    let events = g.handle_update(
        PositionUpdate::Error { handle, error: PositioningError::PermissionDenied },
        t0 + secs(2),
    );

    assert!(events.contains(&GeofenceEvent::Readout(LiveReadout::GpsError {
        error: PositioningError::PermissionDenied
    })));
    assert_eq!(g.positioning.cleared, vec![handle]);
    assert_eq!(g.watch_handle(), None);
    // session survives
    assert_eq!(g.phase(t0 + secs(2)), Phase::Waiting);

    // restarting registers a fresh watch
    g.start_watcher();
    assert_eq!(g.positioning.started, 2);
}

#[test]
fn test_watcher_with_fix_is_not_restarted() {
    let mut g = geofence();
    let t0 = Instant::now();
    g.start_watcher();
    let handle = g.watch_handle().unwrap();
    g.handle_update(fix_at(handle, 20.0), t0);

    assert!(g.start_watcher().is_empty());
    assert_eq!(g.positioning.started, 1);
    assert!(g.positioning.cleared.is_empty());
}

#[test]
fn test_watcher_without_fix_is_replaced() {
    let mut g = geofence();
    let t0 = Instant::now();
    g.start_watcher();
    let stale = g.watch_handle().unwrap();

    g.start_watcher();

    assert_eq!(g.positioning.cleared, vec![stale]);
    assert_eq!(g.positioning.started, 2);
    // updates from the replaced watch are ignored
    assert!(g.handle_update(fix_at(stale, 1.0), t0).is_empty());
    assert!(g.last_fix().is_none());
}

#[test]
fn test_unsupported_positioning() {
    let mut g = Geofence::new(
        FakePositioning { fail_with: Some(PositioningError::Unsupported), ..Default::default() },
        WatchOptions::default(),
    );

    let events = g.start_check_in(Some(target()), Instant::now()).unwrap();

    assert!(events.contains(&GeofenceEvent::Positioning(PositioningStatus::Unsupported)));
    assert_eq!(g.positioning_status(), Some(PositioningStatus::Unsupported));
    assert!(g.has_session());
}

#[test]
fn test_fix_countdown_goes_stale() {
    let t0 = Instant::now();
    let (mut g, _) = waiting(t0);

    let fresh = g.tick(t0 + secs(3));
    assert!(fresh.contains(&GeofenceEvent::FixCountdown(FixFreshness::Fresh { remaining_secs: 3 })));

    let stale = g.tick(t0 + secs(6));
    assert!(stale.contains(&GeofenceEvent::FixCountdown(FixFreshness::Stale)));
    assert!(stale.contains(&GeofenceEvent::TimerTick { elapsed: secs(6) }));
}

#[test]
fn test_haversine_and_bearing() {
    let tel_aviv = Coordinate { lat: 32.0853, lon: 34.7818 };
    let jerusalem = Coordinate { lat: 31.7683, lon: 35.2137 };

    let km = Haversine.distance_m(tel_aviv, jerusalem) / 1000.0;
    assert!((km - 54.0).abs() < 1.5, "got {km}");

    let north = Coordinate { lat: 1.0, lon: 0.0 };
    let origin = Coordinate { lat: 0.0, lon: 0.0 };
    assert!(bearing_deg(origin, north).abs() < 1e-9);
    assert!((bearing_deg(north, origin) - 180.0).abs() < 1e-9);
    assert_eq!(Compass::from_bearing(bearing_deg(tel_aviv, jerusalem)), Compass::SE);
}

#[test]
fn test_compass_rose() {
    assert_eq!(Compass::from_bearing(0.0), Compass::N);
    assert_eq!(Compass::from_bearing(22.4), Compass::N);
    assert_eq!(Compass::from_bearing(22.5), Compass::NE);
    assert_eq!(Compass::from_bearing(90.0), Compass::E);
    assert_eq!(Compass::from_bearing(200.0), Compass::S);
    assert_eq!(Compass::from_bearing(337.6), Compass::N);
    assert_eq!(Compass::NW.to_string(), "NW");
}
