//! Domain models - location aggregates and their normalization
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - Coordinate, LocationId, VisitEntry, LocationAggregate, IntelRecord
//! - `normalize` - Soft-failing cleanup of raw store documents
//! - `intel` - Briefing text to HTML, plain text and summaries

pub mod intel;
pub mod normalize;
pub mod types;

// Re-export commonly used types at module level
pub use normalize::{normalize_location_aggregate, sanitize_coords, NormalizeOptions};
pub use types::{Coordinate, IntelRecord, LocationAggregate, LocationId, VisitEntry};
