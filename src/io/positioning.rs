//! Device positioning boundary
//!
//! A `Positioning` implementation registers watches and later delivers fixes
//! or errors as `PositionUpdate`s tagged with the watch that produced them.
//! `FeedPositioning` is the in-process implementation: whatever holds a
//! `PositionFeed` pushes readings and they are routed to the active watch.

use crate::domain::types::Coordinate;
use crate::error::PositioningError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Options passed to the device when a watch is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Zero means never accept a cached reading
    pub maximum_age: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { high_accuracy: true, timeout: Duration::from_millis(5000), maximum_age: Duration::ZERO }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(pub u64);

impl std::fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub coords: Coordinate,
    pub accuracy_m: Option<f64>,
}

impl PositionFix {
    pub fn at(coords: Coordinate) -> Self {
        Self { coords, accuracy_m: None }
    }
}

/// Reading delivered for a registered watch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionUpdate {
    Fix { handle: WatchHandle, fix: PositionFix },
    Error { handle: WatchHandle, error: PositioningError },
}

impl PositionUpdate {
    pub fn handle(&self) -> WatchHandle {
        match self {
            PositionUpdate::Fix { handle, .. } | PositionUpdate::Error { handle, .. } => *handle,
        }
    }
}

/// Continuous position watching, as offered by a device
pub trait Positioning: Send {
    fn watch(&mut self, options: &WatchOptions) -> Result<WatchHandle, PositioningError>;
    fn clear_watch(&mut self, handle: WatchHandle);
}

#[derive(Debug, Default)]
struct FeedState {
    next_handle: u64,
    active: Option<WatchHandle>,
}

/// Positioning backed by an in-process feed
pub struct FeedPositioning {
    state: Arc<Mutex<FeedState>>,
    supported: bool,
}

/// Producer side of `FeedPositioning`
#[derive(Clone)]
pub struct PositionFeed {
    state: Arc<Mutex<FeedState>>,
    tx: mpsc::Sender<PositionUpdate>,
}

/// Create a positioning source plus the feed that drives it and the update
/// receiver the engine consumes.
pub fn create_position_feed(
    capacity: usize,
) -> (FeedPositioning, PositionFeed, mpsc::Receiver<PositionUpdate>) {
    let (tx, rx) = mpsc::channel(capacity);
    let state = Arc::new(Mutex::new(FeedState::default()));
    (FeedPositioning { state: state.clone(), supported: true }, PositionFeed { state, tx }, rx)
}

impl FeedPositioning {
    /// A device without positioning; every watch fails
    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }
}

impl Positioning for FeedPositioning {
    fn watch(&mut self, options: &WatchOptions) -> Result<WatchHandle, PositioningError> {
        if !self.supported {
            return Err(PositioningError::Unsupported);
        }
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = WatchHandle(state.next_handle);
        state.active = Some(handle);
        debug!(
            handle = %handle,
            high_accuracy = options.high_accuracy,
            timeout_ms = options.timeout.as_millis() as u64,
            "position_watch_started"
        );
        Ok(handle)
    }

    fn clear_watch(&mut self, handle: WatchHandle) {
        let mut state = self.state.lock();
        if state.active == Some(handle) {
            state.active = None;
            debug!(handle = %handle, "position_watch_cleared");
        }
    }
}

impl PositionFeed {
    fn active(&self) -> Option<WatchHandle> {
        self.state.lock().active
    }

    /// Deliver a fix to the active watch. Returns false when nothing is
    /// watching or the consumer is gone.
    pub async fn push_fix(&self, fix: PositionFix) -> bool {
        let Some(handle) = self.active() else {
            debug!("position_fix_without_watch");
            return false;
        };
        self.send(PositionUpdate::Fix { handle, fix }).await
    }

    pub async fn push_error(&self, error: PositioningError) -> bool {
        let Some(handle) = self.active() else {
            return false;
        };
        self.send(PositionUpdate::Error { handle, error }).await
    }

    async fn send(&self, update: PositionUpdate) -> bool {
        if self.tx.send(update).await.is_err() {
            warn!("position_consumer_closed");
            return false;
        }
        true
    }
}
