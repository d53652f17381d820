//! Claim attempt outcomes.

use chrono::NaiveDate;

use crate::domain::Resource;
use crate::error::ProbeError;

/// Result of a single claim attempt against the booking system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The slot is now held by us
    Confirmed,
    /// Another actor holds the date; the attempt was rolled back
    Conflicted,
    /// Unknown state; do not assume claimed and do not retry in this run
    Error(ProbeError),
}

/// One attempt, kept only for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimAttempt {
    pub resource: Resource,
    pub date: NaiveDate,
    pub outcome: ClaimOutcome,
}
