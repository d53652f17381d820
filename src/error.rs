//! Error types for hotdesk
//!
//! Centralized error handling using thiserror. Per-date and per-resource
//! failures are contained by the cascade; a run aborts only on `Session`
//! or on a ledger it cannot read.

use thiserror::Error;

/// Errors that can abort an operation
#[derive(Debug, Error)]
pub enum HotdeskError {
    /// The booking system session could not be established
    #[error("Session error: {0}")]
    Session(String),

    /// Ledger storage error
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Candidate planning was asked for with an unusable configuration
    #[error("Planning error: {0}")]
    Planning(String),

    /// Prober error outside of the per-date containment
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),
}

/// Storage failures of the claims ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The connection mutex was poisoned by a panicking writer
    #[error("Ledger lock poisoned: {0}")]
    Poisoned(String),

    /// A stored value could not be read back
    #[error("Corrupt ledger value: {0}")]
    Corrupt(String),

    /// The ledger directory could not be created
    #[error("Ledger IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport and protocol failures talking to the booking system
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The call did not finish within its deadline
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// Network or HTTP failure
    #[error("transport: {0}")]
    Transport(String),

    /// The booking system answered with something unexpected
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// A configuration value that was rejected and replaced by a default
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("resource code '{0}' ignored: expected a code like P17-1001")]
    InvalidResource(String),

    #[error("weekday '{0}' ignored: must be an integer between 0 and 6")]
    InvalidWeekday(String),

    #[error("no valid resources configured, using defaults")]
    NoResources,

    #[error("no valid weekdays configured, using Wednesday and Thursday")]
    NoWeekdays,

    #[error("horizon of 0 days ignored, using {0}")]
    ZeroHorizon(u32),

    #[error("horizon of {value} days clamped to {clamped}")]
    HorizonClamped { value: u32, clamped: u32 },

    #[error("{name} of {value}ms clamped to {clamped}ms")]
    TimeoutClamped { name: &'static str, value: u64, clamped: u64 },
}

/// Result type alias for hotdesk operations
pub type Result<T> = std::result::Result<T, HotdeskError>;
