//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `merge` - Folds a completed wait into a location aggregate
//! - `stats` - Day/hour wait averages from the visit window
//! - `geofence` - Check-in session and arrival confirmation state machine
//! - `cache` - Normalized local copy of the store's locations
//! - `engine` - Orchestrates the above against the collaborators

pub mod cache;
pub mod engine;
pub mod geofence;
pub mod merge;
pub mod stats;

// Re-export commonly used types
pub use cache::LocationCache;
pub use engine::{Command, Engine};
pub use geofence::{Geofence, Phase, Target};
