//! Check-in engine
//!
//! Owns the geofence session, the location cache and the collaborator
//! handles, and exposes the operations the presentation layer calls. The
//! `run` loop multiplexes device fixes, store snapshots, user commands and
//! the readout cadence on one task, so every handler sees a consistent view.

use crate::domain::intel::intel_summary;
use crate::domain::normalize::NormalizeOptions;
use crate::domain::types::{Coordinate, IntelRecord, LocationAggregate, LocationId, UNNAMED_LOCATION};
use crate::error::{Error, Result, StoreError, TransportError, ValidationError};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::briefing::BriefingService;
use crate::io::geocoder::{GeocodeResult, Geocoder};
use crate::io::journal::{Journal, JournalEntry};
use crate::io::notice::{Notice, NoticeSender};
use crate::io::positioning::{PositionUpdate, Positioning};
use crate::io::store::{DocumentWrite, LocationStore, StoredLocation};
use crate::services::cache::LocationCache;
use crate::services::geofence::{
    Completion, DistanceModel, FinishOutcome, Geofence, GeofenceEvent, Phase, Target, READOUT_CADENCE,
};
use crate::services::merge::{
    prepare_check_in_update, prepare_intel_update, prepare_rename, CheckInPayload, CheckInUpdate,
    IntelDecision, IntelPayload, LAST_UPDATED_AT,
};
use crate::services::stats::{compute_location_stats, format_duration, LocationStats};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Summary length for intel notices
const INTEL_SUMMARY_SENTENCES: usize = 2;
const INTEL_SUMMARY_CHARS: usize = 160;

/// User intents delivered to the run loop
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// `coords` and `name` describe a place that is not in the cache yet
    StartCheckIn {
        location_id: LocationId,
        #[serde(default)]
        coords: Option<Coordinate>,
        #[serde(default)]
        name: Option<String>,
    },
    RetryPositioning,
    ConfirmArrival,
    DenyArrival,
    FinishCheckIn { save: bool },
    RenameLocation { location_id: LocationId, name: String },
    FetchIntel { location_id: LocationId },
}

pub struct Engine<P> {
    config: Config,
    geofence: Geofence<P>,
    store: Arc<dyn LocationStore>,
    cache: LocationCache,
    notices: NoticeSender,
    journal: Journal,
    metrics: Arc<Metrics>,
    geocoder: Option<Arc<dyn Geocoder>>,
    briefing: Option<Arc<dyn BriefingService>>,
}

impl<P: Positioning> Engine<P> {
    pub fn new(
        config: Config,
        positioning: P,
        store: Arc<dyn LocationStore>,
        notices: NoticeSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        let geofence = Geofence::new(positioning, config.watch_options());
        let journal = Journal::new(config.journal_file());
        Self {
            config,
            geofence,
            store,
            cache: LocationCache::new(),
            notices,
            journal,
            metrics,
            geocoder: None,
            briefing: None,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_briefing(mut self, briefing: Arc<dyn BriefingService>) -> Self {
        self.briefing = Some(briefing);
        self
    }

    pub fn with_distance_model(mut self, model: impl DistanceModel + 'static) -> Self {
        self.geofence = self.geofence.with_distance_model(model);
        self
    }

    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions::at(Utc::now()).with_max_visit_history(self.config.max_visits())
    }

    pub fn phase(&self, now: Instant) -> Phase {
        self.geofence.phase(now)
    }

    pub fn geofence(&self) -> &Geofence<P> {
        &self.geofence
    }

    pub fn cache(&self) -> &LocationCache {
        &self.cache
    }

    // ---- store subscription ----

    /// Replace the cache with a store snapshot
    pub fn apply_snapshot(&mut self, snapshot: &[StoredLocation]) {
        let opts = self.normalize_options();
        self.cache.apply_snapshot(snapshot, &opts);
        self.metrics.record_snapshot_applied(self.cache.len());
        self.notices.send(Notice::CacheRefreshed { locations: self.cache.len() });
    }

    /// Prime the cache from the store's current snapshot
    pub fn refresh_from_store(&mut self) {
        let snapshot = self.store.subscribe().borrow().clone();
        self.apply_snapshot(&snapshot);
    }

    // ---- lookups ----

    pub fn get_aggregate(&self, id: &LocationId) -> Option<&LocationAggregate> {
        self.cache.get(id)
    }

    /// Cached aggregate, or a direct store read for one the subscription has
    /// not delivered yet. A store hit is cached.
    pub async fn load_aggregate(&mut self, id: &LocationId) -> Result<Option<LocationAggregate>> {
        if let Some(aggregate) = self.cache.get(id) {
            return Ok(Some(aggregate.clone()));
        }
        let Some(document) = self.store.get(id).await? else {
            return Ok(None);
        };
        debug!(location_id = %id, "aggregate_read_through");
        let opts = self.normalize_options();
        Ok(Some(self.cache.upsert_document(id, &document, &opts).clone()))
    }

    pub fn get_stats(&self, id: &LocationId) -> Option<LocationStats> {
        self.cache.get(id).map(|aggregate| compute_location_stats(&aggregate.visits))
    }

    /// Check-in target for a cached location; `None` without a coordinate
    pub fn target_for(&self, id: &LocationId) -> Option<Target> {
        let aggregate = self.cache.get(id)?;
        let coords = aggregate.coords?;
        Some(Target { id: aggregate.id.clone(), name: aggregate.name.clone(), coords })
    }

    /// Target from caller-supplied place details, falling back to the cache
    pub fn resolve_target(&self, id: &LocationId, coords: Option<Coordinate>, name: Option<&str>) -> Option<Target> {
        let Some(coords) = coords else {
            return self.target_for(id);
        };
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| self.cache.get(id).map(|a| a.name.clone()))
            .unwrap_or_else(|| UNNAMED_LOCATION.to_string());
        Some(Target { id: id.clone(), name, coords })
    }

    /// Target for a search hit. A cached location at the same id keeps its name.
    pub fn target_for_place(&self, place: &GeocodeResult) -> Target {
        let id = place.location_id();
        self.target_for(&id).unwrap_or(Target {
            id,
            name: place.display_name.clone(),
            coords: place.coords,
        })
    }

    // ---- geofence ----

    pub fn start_check_in(&mut self, target: Option<Target>, now: Instant) -> Result<()> {
        let started = target.as_ref().map(|t| (t.id.clone(), t.name.clone()));
        let events = self.geofence.start_check_in(target, now)?;
        if let Some((location_id, name)) = started {
            self.notices.send(Notice::CheckInStarted { location_id, name });
        }
        self.emit(events);
        Ok(())
    }

    pub fn handle_position(&mut self, update: PositionUpdate, now: Instant) {
        match &update {
            PositionUpdate::Fix { .. } => self.metrics.record_fix(),
            PositionUpdate::Error { error, .. } => {
                debug!(error = %error, "position_error_received");
                self.metrics.record_positioning_error();
            }
        }
        let events = self.geofence.handle_update(update, now);
        self.emit(events);
    }

    pub fn tick(&mut self, now: Instant) {
        let events = self.geofence.tick(now);
        self.emit(events);
    }

    /// Retry acquiring positioning after a failure
    pub fn restart_positioning(&mut self) {
        let events = self.geofence.start_watcher();
        self.emit(events);
    }

    fn emit(&self, events: Vec<GeofenceEvent>) {
        for event in events {
            if matches!(event, GeofenceEvent::ArrivalPrompt { .. }) {
                self.metrics.record_arrival_prompted();
            }
            self.notices.send(event.into());
        }
    }

    pub async fn confirm_arrival(&mut self, now: Instant) -> Result<LocationAggregate> {
        let completion = self.geofence.confirm_arrival(now)?;
        self.save_completion(completion).await
    }

    pub fn deny_arrival(&mut self, now: Instant) -> Result<()> {
        self.geofence.deny_arrival(now)?;
        self.metrics.record_arrival_denied();
        Ok(())
    }

    /// End the active check-in. Returns the updated aggregate when saved.
    pub async fn finish_check_in(&mut self, save: bool, now: Instant) -> Result<Option<LocationAggregate>> {
        let location_id = self.geofence.target().map(|t| t.id.clone());
        match self.geofence.finish(save, now)? {
            FinishOutcome::Discarded { .. } => {
                self.metrics.record_check_in_discarded();
                if let Some(location_id) = location_id {
                    self.notices.send(Notice::Discarded { location_id });
                }
                Ok(None)
            }
            FinishOutcome::Save(completion) => self.save_completion(completion).await.map(Some),
        }
    }

    async fn save_completion(&mut self, completion: Completion) -> Result<LocationAggregate> {
        let Completion { target, wait } = completion;
        self.notices.send(Notice::Saving { location_id: target.id.clone() });

        let started = Instant::now();
        let result = self.commit_check_in(&target, wait).await;
        self.metrics.record_store_write(started.elapsed().as_millis() as u64);

        let (document, update) = match result {
            Ok(committed) => committed,
            Err(e) => {
                self.geofence.save_failed();
                self.metrics.record_save_failure();
                warn!(location_id = %target.id, error = %e, "check_in_save_failed");
                self.notices.send(Notice::SaveFailed {
                    location_id: target.id.clone(),
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                });
                return Err(e);
            }
        };

        self.geofence.save_succeeded();
        let opts = self.normalize_options();
        let aggregate = self.cache.upsert_document(&target.id, &document, &opts).clone();

        let wait_secs = update.new_visit.wait_seconds;
        let entry = JournalEntry::new(self.config.site_id(), &target.id, &aggregate.name, &update.new_visit);
        if !self.journal.write_entry(&entry) {
            self.metrics.record_journal_failure();
        }
        self.metrics.record_check_in_saved(wait_secs);
        info!(
            location_id = %target.id,
            wait_secs = %wait_secs,
            total_check_ins = aggregate.total_check_ins,
            "check_in_saved"
        );
        self.notices.send(Notice::Saved {
            location_id: target.id,
            wait_secs,
            display: format_duration(wait_secs),
        });
        Ok(aggregate)
    }

    /// Read-merge-write of one check-in inside a store transaction
    async fn commit_check_in(&self, target: &Target, wait: Duration) -> Result<(Value, CheckInUpdate)> {
        let payload = CheckInPayload::new(wait.as_secs_f64(), Utc::now())
            .with_coords(Some(target.coords))
            .with_name(target.name.clone())
            .with_max_visit_history(self.config.max_visits());

        let mut prepared = None;
        let committed = self
            .store
            .transact(&target.id, &mut |existing: Option<&Value>| -> Result<Option<DocumentWrite>> {
                let update = prepare_check_in_update(&target.id, existing.unwrap_or(&Value::Null), &payload)?;
                let write = DocumentWrite::merge(update.to_patch()).with_server_timestamp(LAST_UPDATED_AT);
                prepared = Some(update);
                Ok(Some(write))
            })
            .await?;

        match (committed, prepared) {
            (Some(document), Some(update)) => Ok((document, update)),
            _ => Err(StoreError::Transaction("check-in write was not committed".to_string()).into()),
        }
    }

    // ---- location edits ----

    pub async fn rename_location(&mut self, id: &LocationId, new_name: &str) -> Result<LocationAggregate> {
        let patch = prepare_rename(new_name)?;
        let committed = self
            .store
            .transact(id, &mut |_existing: Option<&Value>| -> Result<Option<DocumentWrite>> {
                Ok(Some(DocumentWrite::merge(patch.clone()).with_server_timestamp(LAST_UPDATED_AT)))
            })
            .await?
            .ok_or_else(|| StoreError::Transaction("rename was not committed".to_string()))?;

        let opts = self.normalize_options();
        let aggregate = self.cache.upsert_document(id, &committed, &opts).clone();
        self.metrics.record_rename();
        info!(location_id = %id, name = %aggregate.name, "location_renamed");
        Ok(aggregate)
    }

    /// Store a briefing unless one is already there; returns the stored one
    pub async fn record_intel(&mut self, id: &LocationId, payload: &IntelPayload) -> Result<IntelRecord> {
        let mut decision = None;
        let committed = self
            .store
            .transact(id, &mut |existing: Option<&Value>| -> Result<Option<DocumentWrite>> {
                let prepared = prepare_intel_update(id, existing, payload);
                let write = match &prepared {
                    IntelDecision::KeepExisting(_) => None,
                    IntelDecision::Write { patch, .. } => Some(
                        DocumentWrite::merge(patch.clone())
                            .with_server_timestamp("intel.createdAt")
                            .with_server_timestamp("intel.updatedAt")
                            .with_server_timestamp(LAST_UPDATED_AT),
                    ),
                };
                decision = Some(prepared);
                Ok(write)
            })
            .await?;

        let record = match (decision, committed) {
            (Some(IntelDecision::KeepExisting(existing)), _) => {
                self.metrics.record_intel_write(true);
                info!(location_id = %id, "intel_kept_existing");
                existing
            }
            (Some(IntelDecision::Write { record, .. }), Some(document)) => {
                self.metrics.record_intel_write(false);
                let opts = self.normalize_options();
                let aggregate = self.cache.upsert_document(id, &document, &opts);
                info!(location_id = %id, sources = record.sources.len(), "intel_recorded");
                aggregate.intel.clone().unwrap_or(record)
            }
            _ => return Err(StoreError::Transaction("intel write was not committed".to_string()).into()),
        };

        self.notices.send(Notice::IntelReady {
            location_id: id.clone(),
            summary: intel_summary(&record, INTEL_SUMMARY_SENTENCES, INTEL_SUMMARY_CHARS),
        });
        Ok(record)
    }

    /// Cached intel when present, otherwise a fresh briefing stored first-writer-wins
    pub async fn fetch_intel(&mut self, id: &LocationId, place_name: &str, coords: Coordinate) -> Result<IntelRecord> {
        if let Some(intel) = self.cache.get(id).and_then(|a| a.intel.clone()) {
            debug!(location_id = %id, "intel_cache_hit");
            return Ok(intel);
        }
        let briefing = self.briefing.clone().ok_or(TransportError::Disabled)?;

        self.metrics.record_briefing_request();
        let mut payload = match briefing.fetch_briefing(coords, place_name).await {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_transport_error();
                warn!(location_id = %id, error = %e, "briefing_fetch_failed");
                return Err(e.into());
            }
        };
        payload.place_name.get_or_insert_with(|| place_name.to_string());
        payload.coords.get_or_insert(coords);
        self.record_intel(id, &payload).await
    }

    pub async fn search_location(&self, query: &str) -> Result<Option<GeocodeResult>> {
        let geocoder = self.geocoder.as_ref().ok_or(TransportError::Disabled)?;
        self.metrics.record_geocode_request();
        geocoder.resolve(query).await.map_err(|e| {
            self.metrics.record_transport_error();
            warn!(query = %query, error = %e, "geocode_failed");
            Error::from(e)
        })
    }

    // ---- run loop ----

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        let now = Instant::now();
        match command {
            Command::StartCheckIn { location_id, coords, name } => {
                let target = self.resolve_target(&location_id, coords, name.as_deref());
                if target.is_none() {
                    warn!(location_id = %location_id, "check_in_target_unknown");
                }
                self.start_check_in(target, now)
            }
            Command::RetryPositioning => {
                self.restart_positioning();
                Ok(())
            }
            Command::ConfirmArrival => self.confirm_arrival(now).await.map(|_| ()),
            Command::DenyArrival => self.deny_arrival(now),
            Command::FinishCheckIn { save } => self.finish_check_in(save, now).await.map(|_| ()),
            Command::RenameLocation { location_id, name } => {
                self.rename_location(&location_id, &name).await.map(|_| ())
            }
            Command::FetchIntel { location_id } => {
                let aggregate =
                    self.load_aggregate(&location_id).await?.ok_or(ValidationError::MissingLocationId)?;
                let coords = aggregate.coords.ok_or(ValidationError::InvalidCoordinate)?;
                self.fetch_intel(&location_id, &aggregate.name, coords).await.map(|_| ())
            }
        }
    }

    /// Process until the command channel closes or shutdown is signalled
    pub async fn run(
        &mut self,
        mut position_rx: mpsc::Receiver<PositionUpdate>,
        mut command_rx: mpsc::Receiver<Command>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut snapshots = self.store.subscribe();
        let initial = snapshots.borrow_and_update().clone();
        self.apply_snapshot(&initial);

        let mut readout_interval = interval(READOUT_CADENCE);
        let mut metrics_interval = interval(Duration::from_secs(self.config.metrics_interval_secs().max(1)));
        let mut positions_open = true;
        info!(locations = self.cache.len(), "engine_started");

        loop {
            tokio::select! {
                update = position_rx.recv(), if positions_open => {
                    match update {
                        Some(update) => self.handle_position(update, Instant::now()),
                        None => {
                            info!("position_feed_closed");
                            positions_open = false;
                        }
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(command) => {
                            debug!(command = ?command, "command_received");
                            if let Err(e) = self.handle_command(command).await {
                                warn!(error = %e, "command_failed");
                            }
                        }
                        None => break,
                    }
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        warn!("store_subscription_closed");
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    self.apply_snapshot(&snapshot);
                }
                _ = readout_interval.tick() => {
                    self.tick(Instant::now());
                }
                _ = metrics_interval.tick() => {
                    self.metrics.report(self.geofence.has_session()).log();
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("engine_stopped");
    }
}
