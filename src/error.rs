//! Error taxonomy
//!
//! Normalizers never produce these; they fail soft. Mutations and
//! transactions report them and leave state untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bad caller input. Nothing was mutated; re-entering valid input recovers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("wait duration must be a finite number greater than zero, got {0}")]
    InvalidWaitDuration(f64),

    #[error("coordinate must have finite latitude and longitude")]
    InvalidCoordinate,

    #[error("location name must contain at least one character")]
    EmptyName,

    #[error("location id is required")]
    MissingLocationId,
}

/// Check-in session misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("select a target location before starting a check-in")]
    NoTargetSelected,

    #[error("no check-in is in progress")]
    NoActiveSession,

    #[error("arrival is not awaiting confirmation")]
    NotPendingConfirmation,

    #[error("a save for this check-in is already in flight")]
    SaveInProgress,
}

/// Positioning subsystem failures. Never fatal to a session.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositioningError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable")]
    Unavailable,

    #[error("position request timed out")]
    Timeout,

    #[error("positioning is not supported on this device")]
    Unsupported,
}

impl PositioningError {
    /// Whether the user can recover by retrying
    pub fn is_retryable(self) -> bool {
        !matches!(self, PositioningError::Unsupported)
    }
}

/// Shared store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("malformed document {id}: {reason}")]
    Malformed { id: String, reason: String },
}

/// Outbound HTTP collaborator failures (geocoder, briefing service)
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("service disabled by configuration")]
    Disabled,
}

/// Crate-level error for the engine's public operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Positioning(#[from] PositioningError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Whether retrying the same call may succeed without new input
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation(_) | Error::Session(_) => false,
            Error::Positioning(e) => e.is_retryable(),
            Error::Store(StoreError::Malformed { .. }) => false,
            Error::Store(_) => true,
            Error::Transport(TransportError::Disabled) => false,
            Error::Transport(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
