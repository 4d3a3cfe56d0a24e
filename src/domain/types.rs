//! Shared types for the presence-tracking engine

use chrono::{DateTime, Datelike, Local, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

/// Upper bound on the recency window kept per location
pub const MAX_VISIT_HISTORY: usize = 20;

/// Placeholder used when a location has no usable name
pub const UNNAMED_LOCATION: &str = "unnamed location";

/// Locale stamped on intel records that arrive without one
pub const DEFAULT_INTEL_LOCALE: &str = "he-IL";

/// WGS84 coordinate, both axes finite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting non-finite axes
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if lat.is_finite() && lon.is_finite() {
            Some(Self { lat, lon })
        } else {
            None
        }
    }

    pub fn to_value(self) -> Value {
        serde_json::json!({ "lat": self.lat, "lon": self.lon })
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Newtype wrapper for store document ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub String);

impl LocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id for a place picked from the map or the geocoder that has no stored record yet
    pub fn from_coords(coords: Coordinate) -> Self {
        Self(format!("loc_{:.6}_{:.6}", coords.lat, coords.lon))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timestamp shapes found in stored documents
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawTimestamp {
    #[default]
    Missing,
    /// Store-native `{seconds, nanoseconds}` object
    StoreNative { seconds: i64, nanos: u32 },
    /// Already-typed instant handed over by in-process callers
    Instant(DateTime<Utc>),
    /// ISO-8601 (or RFC 2822) string
    Text(String),
}

impl RawTimestamp {
    /// Classify an untrusted JSON value
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => RawTimestamp::Text(s.clone()),
            Some(Value::Object(obj)) => {
                let seconds = obj
                    .get("seconds")
                    .or_else(|| obj.get("_seconds"))
                    .and_then(Value::as_i64);
                let nanos = obj
                    .get("nanoseconds")
                    .or_else(|| obj.get("_nanoseconds"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                match seconds {
                    Some(seconds) => RawTimestamp::StoreNative {
                        seconds,
                        nanos: u32::try_from(nanos).unwrap_or(0),
                    },
                    None => RawTimestamp::Missing,
                }
            }
            _ => RawTimestamp::Missing,
        }
    }

    /// Absolute instant at millisecond precision, or `None` when the shape
    /// cannot be interpreted
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let at = match self {
            RawTimestamp::Missing => None,
            RawTimestamp::StoreNative { seconds, nanos } => {
                DateTime::from_timestamp(*seconds, *nanos)
            }
            RawTimestamp::Instant(at) => Some(*at),
            RawTimestamp::Text(s) => parse_timestamp_text(s),
        };
        at.map(truncate_millis)
    }

    /// Absolute instant, falling back to `now` for anything unparseable
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.to_datetime().unwrap_or_else(|| truncate_millis(now))
    }
}

/// Drop sub-millisecond precision. Documents carry millisecond ISO strings,
/// so anything finer would not survive a write and re-read.
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = at.nanosecond();
    at.with_nanosecond(nanos - nanos % 1_000_000).unwrap_or(at)
}

fn parse_timestamp_text(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_rfc2822(s) {
        return Some(at.with_timezone(&Utc));
    }
    // Date-only strings are midnight UTC
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Render an instant the way stored documents carry it (millisecond ISO-8601, `Z`)
pub fn iso_millis(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// (day-of-week with Sunday = 0, hour-of-day) of an instant in the process's local timezone.
///
/// Visitors who cross timezones get their stats filed under the normalizing
/// process's wall clock, not the location's.
pub fn local_day_hour(at: &DateTime<Utc>) -> (u8, u8) {
    let local = at.with_timezone(&Local);
    (local.weekday().num_days_from_sunday() as u8, local.hour() as u8)
}

mod iso_millis_serde {
    use super::{iso_millis, truncate_millis};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&iso_millis(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| truncate_millis(at.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}

/// A single observed wait at a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitEntry {
    #[serde(with = "iso_millis_serde")]
    pub timestamp: DateTime<Utc>,
    pub wait_seconds: f64,
    /// 0 = Sunday
    pub day_of_week: u8,
    pub hour_of_day: u8,
}

impl VisitEntry {
    /// Visit stamped with the local day/hour of `at`
    pub fn observed_at(at: DateTime<Utc>, wait_seconds: f64) -> Self {
        let at = truncate_millis(at);
        let (day_of_week, hour_of_day) = local_day_hour(&at);
        Self { timestamp: at, wait_seconds, day_of_week, hour_of_day }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Attributed source of an intel briefing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelSource {
    pub title: String,
    pub uri: String,
}

/// Cached narrative briefing for a location
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntelRecord {
    pub text: String,
    pub html: String,
    pub sources: SmallVec<[IntelSource; 4]>,
    pub locale: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl IntelRecord {
    /// A record counts as present once either body is non-blank
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || !self.html.trim().is_empty()
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("text".to_string(), Value::String(self.text.clone()));
        obj.insert("html".to_string(), Value::String(self.html.clone()));
        obj.insert(
            "sources".to_string(),
            serde_json::to_value(self.sources.as_slice()).unwrap_or(Value::Array(Vec::new())),
        );
        obj.insert("locale".to_string(), Value::String(self.locale.clone()));
        if let Some(at) = &self.created_at {
            obj.insert("createdAt".to_string(), Value::String(iso_millis(at)));
        }
        if let Some(at) = &self.updated_at {
            obj.insert("updatedAt".to_string(), Value::String(iso_millis(at)));
        }
        Value::Object(obj)
    }
}

/// Durable per-location rollup
#[derive(Debug, Clone, PartialEq)]
pub struct LocationAggregate {
    pub id: LocationId,
    pub name: String,
    pub coords: Option<Coordinate>,
    pub total_check_ins: u64,
    pub total_wait_seconds: f64,
    pub avg_wait_seconds: f64,
    /// Most-recent-first, at most `max_visit_history` entries
    pub visits: Vec<VisitEntry>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub intel: Option<IntelRecord>,
}

impl LocationAggregate {
    /// Record with no check-ins yet
    pub fn bare(id: LocationId, name: &str, coords: Option<Coordinate>) -> Self {
        let name = if name.trim().is_empty() { UNNAMED_LOCATION } else { name };
        Self {
            id,
            name: name.to_string(),
            coords,
            total_check_ins: 0,
            total_wait_seconds: 0.0,
            avg_wait_seconds: 0.0,
            visits: Vec::new(),
            last_updated_at: None,
            intel: None,
        }
    }

    pub fn has_intel(&self) -> bool {
        self.intel.as_ref().is_some_and(IntelRecord::has_content)
    }

    /// Document shape written to / read from the `locations` collection
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("name".to_string(), Value::String(self.name.clone()));
        doc.insert(
            "coords".to_string(),
            self.coords.map(Coordinate::to_value).unwrap_or(Value::Null),
        );
        doc.insert("totalCheckIns".to_string(), Value::from(self.total_check_ins));
        doc.insert("totalWaitSeconds".to_string(), Value::from(self.total_wait_seconds));
        doc.insert("avgWaitSeconds".to_string(), Value::from(self.avg_wait_seconds));
        doc.insert(
            "visits".to_string(),
            Value::Array(self.visits.iter().map(VisitEntry::to_value).collect()),
        );
        doc.insert(
            "lastUpdatedAt".to_string(),
            self.last_updated_at.map(|at| Value::String(iso_millis(&at))).unwrap_or(Value::Null),
        );
        doc.insert(
            "intel".to_string(),
            self.intel.as_ref().map(IntelRecord::to_value).unwrap_or(Value::Null),
        );
        doc
    }
}
