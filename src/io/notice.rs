//! Typed channel for user-facing notices
//!
//! The engine never blocks on the UI: notices go through a bounded mpsc
//! channel with `try_send` and are dropped (and counted) when it is full.

use crate::domain::types::LocationId;
use crate::infra::metrics::Metrics;
use crate::services::geofence::{FixFreshness, GeofenceEvent, LiveReadout, PositioningStatus};
use crate::services::stats::format_duration;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Something the presentation layer should show
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum Notice {
    CheckInStarted { location_id: LocationId, name: String },
    /// Elapsed wait, `MM:SS`
    TimerTick { elapsed_secs: u64, display: String },
    Readout { readout: LiveReadout },
    FixCountdown { freshness: FixFreshness },
    ArrivalPrompt { location_id: LocationId, distance_m: f64 },
    Positioning { status: PositioningStatus },
    Saving { location_id: LocationId },
    Saved { location_id: LocationId, wait_secs: f64, display: String },
    SaveFailed { location_id: LocationId, message: String, retryable: bool },
    Discarded { location_id: LocationId },
    CacheRefreshed { locations: usize },
    IntelReady { location_id: LocationId, summary: String },
}

impl From<GeofenceEvent> for Notice {
    fn from(event: GeofenceEvent) -> Self {
        match event {
            GeofenceEvent::Readout(readout) => Notice::Readout { readout },
            GeofenceEvent::TimerTick { elapsed } => Notice::TimerTick {
                elapsed_secs: elapsed.as_secs(),
                display: format_duration(elapsed.as_secs() as f64),
            },
            GeofenceEvent::FixCountdown(freshness) => Notice::FixCountdown { freshness },
            GeofenceEvent::ArrivalPrompt { target, distance_m } => {
                Notice::ArrivalPrompt { location_id: target, distance_m }
            }
            GeofenceEvent::Positioning(status) => Notice::Positioning { status },
        }
    }
}

/// Non-blocking notice producer
#[derive(Clone)]
pub struct NoticeSender {
    tx: mpsc::Sender<Notice>,
    metrics: Arc<Metrics>,
}

impl NoticeSender {
    pub fn new(tx: mpsc::Sender<Notice>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Use try_send to avoid blocking - drop if channel full or closed
    pub fn send(&self, notice: Notice) {
        if self.tx.try_send(notice).is_err() {
            self.metrics.record_notice_dropped();
        }
    }

    pub fn send_all(&self, notices: impl IntoIterator<Item = impl Into<Notice>>) {
        for notice in notices {
            self.send(notice.into());
        }
    }
}

/// Create a new notice channel pair
pub fn create_notice_channel(capacity: usize, metrics: Arc<Metrics>) -> (NoticeSender, mpsc::Receiver<Notice>) {
    let (tx, rx) = mpsc::channel(capacity);
    (NoticeSender::new(tx, metrics), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timer_tick_display() {
        let notice: Notice = GeofenceEvent::TimerTick { elapsed: Duration::from_secs(125) }.into();
        assert_eq!(notice, Notice::TimerTick { elapsed_secs: 125, display: "02:05".to_string() });
    }

    #[test]
    fn test_notice_json_shape() {
        let notice = Notice::Readout { readout: LiveReadout::AwaitingFix };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["t"], "readout");
        assert_eq!(json["readout"]["state"], "awaiting_fix");
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let metrics = Arc::new(Metrics::new());
        let (sender, mut rx) = create_notice_channel(1, metrics.clone());

        sender.send(Notice::CacheRefreshed { locations: 1 });
        sender.send(Notice::CacheRefreshed { locations: 2 });

        assert_eq!(rx.try_recv().unwrap(), Notice::CacheRefreshed { locations: 1 });
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.notices_dropped(), 1);
    }
}
