//! Check-in merge engine
//!
//! Pure functions computing the next state of a location aggregate. They do
//! not touch the store: the caller must run read-existing and write-merged as
//! one atomic read-modify-write, otherwise two concurrent check-ins at the
//! same place clobber each other's counters.

use crate::domain::normalize::{normalize_location_aggregate, sanitize_coords, NormalizeOptions};
use crate::domain::types::{
    iso_millis, Coordinate, IntelRecord, IntelSource, LocationAggregate, LocationId, VisitEntry,
    DEFAULT_INTEL_LOCALE, MAX_VISIT_HISTORY,
};
use crate::domain::intel::format_intel_html;
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Fields the store substitutes with its own clock on write
pub const LAST_UPDATED_AT: &str = "lastUpdatedAt";

/// A completed wait to fold into an aggregate
#[derive(Debug, Clone)]
pub struct CheckInPayload {
    pub wait_seconds: f64,
    pub now: DateTime<Utc>,
    /// Preferred over the stored coordinate when present
    pub coords: Option<Coordinate>,
    /// Preferred over the stored name when non-blank
    pub name: Option<String>,
    pub max_visit_history: usize,
}

impl CheckInPayload {
    pub fn new(wait_seconds: f64, now: DateTime<Utc>) -> Self {
        Self { wait_seconds, now, coords: None, name: None, max_visit_history: MAX_VISIT_HISTORY }
    }

    pub fn with_coords(mut self, coords: Option<Coordinate>) -> Self {
        self.coords = coords;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_visit_history(mut self, max: usize) -> Self {
        self.max_visit_history = max;
        self
    }
}

/// Result of folding one wait into an aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct CheckInUpdate {
    pub name: String,
    pub coords: Option<Coordinate>,
    pub total_check_ins: u64,
    pub total_wait_seconds: f64,
    pub avg_wait_seconds: f64,
    pub visits: Vec<VisitEntry>,
    pub new_visit: VisitEntry,
}

impl CheckInUpdate {
    /// Merge patch for the store. `lastUpdatedAt` is left to the store's clock.
    pub fn to_patch(&self) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("name".to_string(), Value::String(self.name.clone()));
        patch.insert(
            "coords".to_string(),
            self.coords.map(Coordinate::to_value).unwrap_or(Value::Null),
        );
        patch.insert("totalCheckIns".to_string(), Value::from(self.total_check_ins));
        patch.insert("totalWaitSeconds".to_string(), Value::from(self.total_wait_seconds));
        patch.insert("avgWaitSeconds".to_string(), Value::from(self.avg_wait_seconds));
        patch.insert(
            "visits".to_string(),
            Value::Array(self.visits.iter().map(VisitEntry::to_value).collect()),
        );
        patch.insert(
            "lastVisitAt".to_string(),
            Value::String(iso_millis(&self.new_visit.timestamp)),
        );
        patch
    }
}

/// Reject anything but a finite, strictly positive wait
pub fn validate_wait_seconds(wait_seconds: f64) -> Result<f64, ValidationError> {
    if wait_seconds.is_finite() && wait_seconds > 0.0 {
        Ok(wait_seconds)
    } else {
        Err(ValidationError::InvalidWaitDuration(wait_seconds))
    }
}

/// Fold a completed wait into `existing`.
///
/// `existing` is re-normalized first so a partially formed or missing record
/// (`Value::Null`) behaves like an empty aggregate. The average is re-derived
/// from the exact totals every time.
pub fn prepare_check_in_update(
    id: &LocationId,
    existing: &Value,
    payload: &CheckInPayload,
) -> Result<CheckInUpdate, ValidationError> {
    let wait_seconds = validate_wait_seconds(payload.wait_seconds)?;

    let opts = NormalizeOptions::at(payload.now).with_max_visit_history(payload.max_visit_history);
    let current = normalize_location_aggregate(id, existing, &opts);

    let new_visit = VisitEntry::observed_at(payload.now, wait_seconds);

    let mut visits = Vec::with_capacity(current.visits.len() + 1);
    visits.push(new_visit.clone());
    visits.extend(current.visits);
    visits.truncate(payload.max_visit_history);

    let total_check_ins = current.total_check_ins + 1;
    let total_wait_seconds = current.total_wait_seconds + wait_seconds;
    let avg_wait_seconds = total_wait_seconds / total_check_ins as f64;

    let coords = payload.coords.or(current.coords);
    let name = payload
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(current.name.as_str())
        .to_string();

    Ok(CheckInUpdate {
        name,
        coords,
        total_check_ins,
        total_wait_seconds,
        avg_wait_seconds,
        visits,
        new_visit,
    })
}

/// Trimmed non-empty name, or `EmptyName`
pub fn validate_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(ValidationError::EmptyName)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Merge patch for a rename
pub fn prepare_rename(new_name: &str) -> Result<Map<String, Value>, ValidationError> {
    let name = validate_name(new_name)?;
    let mut patch = Map::new();
    patch.insert("name".to_string(), Value::String(name));
    Ok(patch)
}

/// Intel payload as handed over by the briefing fetch
#[derive(Debug, Clone, Default)]
pub struct IntelPayload {
    pub text: String,
    pub html: Option<String>,
    pub sources: Vec<(String, String)>,
    pub locale: Option<String>,
    /// Used only when the location has no name or coordinate yet
    pub place_name: Option<String>,
    pub coords: Option<Coordinate>,
}

/// Clean an intel payload into the record that would be stored
pub fn sanitize_intel(payload: &IntelPayload) -> IntelRecord {
    let html = payload
        .html
        .as_deref()
        .filter(|h| !h.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format_intel_html(&payload.text));
    let sources = payload
        .sources
        .iter()
        .map(|(title, uri)| (title.trim(), uri.trim()))
        .filter(|(title, uri)| !title.is_empty() && !uri.is_empty())
        .map(|(title, uri)| IntelSource {
            title: title.to_string(),
            uri: uri.to_string(),
        })
        .collect();
    let locale = payload
        .locale
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(DEFAULT_INTEL_LOCALE)
        .to_string();

    IntelRecord {
        text: payload.text.clone(),
        html,
        sources,
        locale,
        created_at: None,
        updated_at: None,
    }
}

/// What an intel write should do given the current document
#[derive(Debug, Clone, PartialEq)]
pub enum IntelDecision {
    /// A non-empty intel is already stored; keep it and hand it back
    KeepExisting(IntelRecord),
    /// Write this patch (merge semantics); `createdAt`/`updatedAt` come from the store clock
    Write { patch: Map<String, Value>, record: IntelRecord },
}

/// First-writer-wins intel merge.
///
/// `existing` is `None` when the document does not exist; a bare aggregate is
/// created around the intel in that case.
pub fn prepare_intel_update(
    id: &LocationId,
    existing: Option<&Value>,
    payload: &IntelPayload,
) -> IntelDecision {
    let record = sanitize_intel(payload);
    let place_name = payload
        .place_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    let coords = payload.coords.and_then(|c| Coordinate::new(c.lat, c.lon));

    match existing {
        Some(doc) => {
            let stored = doc
                .get("intel")
                .and_then(crate::domain::normalize::normalize_intel);
            if let Some(stored) = stored {
                return IntelDecision::KeepExisting(stored);
            }

            let mut patch = Map::new();
            patch.insert("intel".to_string(), record.to_value());
            let has_name = doc.get("name").and_then(Value::as_str).is_some_and(|n| !n.is_empty());
            if let (false, Some(name)) = (has_name, place_name) {
                patch.insert("name".to_string(), Value::String(name.to_string()));
            }
            let has_coords = doc.get("coords").and_then(sanitize_coords).is_some();
            if let (false, Some(coords)) = (has_coords, coords) {
                patch.insert("coords".to_string(), coords.to_value());
            }
            IntelDecision::Write { patch, record }
        }
        None => {
            let name = place_name
                .map(str::to_string)
                .unwrap_or_else(|| format!("Location {id}"));
            let mut bare = LocationAggregate::bare(id.clone(), &name, coords);
            bare.intel = Some(record.clone());
            let mut patch = bare.to_document();
            patch.remove(LAST_UPDATED_AT);
            IntelDecision::Write { patch, record }
        }
    }
}
