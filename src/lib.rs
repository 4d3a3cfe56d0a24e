//! Waitline library
//!
//! Crowd-sourced wait times: a geofenced check-in timer per visit, folded
//! into per-location aggregates in a shared store.
//!
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod error;
pub mod infra;
pub mod io;
pub mod services;
