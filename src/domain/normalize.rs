//! Defensive normalization of documents read from the shared store
//!
//! Everything here fails soft: malformed input yields `None` or a safe
//! default, never an error. Callers that need to reject bad input use the
//! validated constructors in `services::merge` instead.

use crate::domain::types::{
    local_day_hour, Coordinate, IntelRecord, IntelSource, LocationAggregate, LocationId,
    RawTimestamp, VisitEntry, DEFAULT_INTEL_LOCALE, MAX_VISIT_HISTORY, UNNAMED_LOCATION,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

const LAT_KEYS: [&str; 3] = ["lat", "latitude", "Latitude"];
const LON_KEYS: [&str; 4] = ["lon", "lng", "longitude", "Longitude"];

/// Knobs shared by every normalizer
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Fallback instant for missing or unparseable timestamps
    pub now: DateTime<Utc>,
    pub max_visit_history: usize,
}

impl NormalizeOptions {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now, max_visit_history: MAX_VISIT_HISTORY }
    }

    pub fn with_max_visit_history(mut self, max: usize) -> Self {
        self.max_visit_history = max;
        self
    }
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

/// First key holding something other than null
fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| !v.is_null())
}

/// Numbers pass through and numeric strings are parsed whole. A string with
/// trailing characters (`"32.1abc"`) is rejected, not read as its prefix.
pub(crate) fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Integral JSON numbers only; numeric strings do not count
fn as_integer(value: Option<&Value>) -> Option<i64> {
    let Value::Number(n) = value? else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

fn non_blank_string(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// Canonicalize a coordinate payload in any of the accepted spellings
pub fn sanitize_coords(raw: &Value) -> Option<Coordinate> {
    let obj = raw.as_object()?;
    let lat = coerce_number(first_present(obj, &LAT_KEYS)?)?;
    let lon = coerce_number(first_present(obj, &LON_KEYS)?)?;
    Coordinate::new(lat, lon)
}

/// Normalize one stored visit; `None` when the wait is not a positive finite number.
///
/// Explicit in-range `dayOfWeek`/`hourOfDay` values are trusted over the
/// timestamp, even when they disagree with it.
pub fn normalize_visit_entry(raw: &Value, opts: &NormalizeOptions) -> Option<VisitEntry> {
    let obj = raw.as_object()?;

    let timestamp = RawTimestamp::from_value(obj.get("timestamp")).resolve(opts.now);

    let wait_seconds = obj.get("waitSeconds").and_then(coerce_number)?;
    if !wait_seconds.is_finite() || wait_seconds <= 0.0 {
        return None;
    }

    let (derived_day, derived_hour) = local_day_hour(&timestamp);
    let day_of_week = as_integer(obj.get("dayOfWeek"))
        .filter(|d| (0..=6).contains(d))
        .map_or(derived_day, |d| d as u8);
    let hour_of_day = as_integer(obj.get("hourOfDay"))
        .filter(|h| (0..=23).contains(h))
        .map_or(derived_hour, |h| h as u8);

    Some(VisitEntry { timestamp, wait_seconds, day_of_week, hour_of_day })
}

/// Sources survive only with both a title and a uri
fn normalize_sources(raw: Option<&Value>) -> impl Iterator<Item = IntelSource> + '_ {
    raw.and_then(Value::as_array).into_iter().flatten().filter_map(|source| {
        let title = source.get("title").and_then(Value::as_str).unwrap_or_default().trim();
        let uri = source.get("uri").and_then(Value::as_str).unwrap_or_default().trim();
        (!title.is_empty() && !uri.is_empty())
            .then(|| IntelSource { title: title.to_string(), uri: uri.to_string() })
    })
}

/// Normalize a stored intel record; records without any body are dropped
pub fn normalize_intel(raw: &Value) -> Option<IntelRecord> {
    let obj = raw.as_object()?;
    let record = IntelRecord {
        text: obj.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        html: obj.get("html").and_then(Value::as_str).unwrap_or_default().to_string(),
        sources: normalize_sources(obj.get("sources")).collect(),
        locale: non_blank_string(obj.get("locale"))
            .unwrap_or(DEFAULT_INTEL_LOCALE)
            .to_string(),
        created_at: RawTimestamp::from_value(obj.get("createdAt")).to_datetime(),
        updated_at: RawTimestamp::from_value(obj.get("updatedAt")).to_datetime(),
    };
    record.has_content().then_some(record)
}

fn non_negative(value: Option<&Value>) -> f64 {
    value.and_then(coerce_number).filter(|n| n.is_finite() && *n >= 0.0).unwrap_or(0.0)
}

/// Map a raw store document onto a `LocationAggregate`.
///
/// Each field is handled independently. The visit list keeps its stored
/// order (assumed most-recent-first) and is only truncated, never re-sorted.
pub fn normalize_location_aggregate(
    id: &LocationId,
    raw: &Value,
    opts: &NormalizeOptions,
) -> LocationAggregate {
    let empty = Map::new();
    let doc = raw.as_object().unwrap_or(&empty);

    let visits: Vec<VisitEntry> = doc
        .get("visits")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| normalize_visit_entry(entry, opts))
        .take(opts.max_visit_history)
        .collect();

    LocationAggregate {
        id: id.clone(),
        name: non_blank_string(doc.get("name")).unwrap_or(UNNAMED_LOCATION).to_string(),
        coords: doc.get("coords").and_then(sanitize_coords),
        total_check_ins: non_negative(doc.get("totalCheckIns")).floor() as u64,
        total_wait_seconds: non_negative(doc.get("totalWaitSeconds")),
        avg_wait_seconds: non_negative(doc.get("avgWaitSeconds")),
        visits,
        last_updated_at: RawTimestamp::from_value(doc.get("lastUpdatedAt")).to_datetime(),
        intel: doc.get("intel").and_then(normalize_intel),
    }
}
