//! Availability prober - the booking system as seen by the cascade.
//!
//! This module provides:
//! - AvailabilityProber trait for the operations the cascade needs, plus
//!   giving a claim back
//! - HttpProber, a JSON API binding
//! - ScriptedProber, a fixture-driven prober for tests and rehearsals

pub mod http;
pub mod scripted;

use async_trait::async_trait;

use crate::domain::{ClaimOutcome, ClaimRow, Resource, Slot};
use crate::error::ProbeError;

pub use http::{HttpProber, HttpProberConfig};
pub use scripted::{ProberCall, ScriptedOutcome, ScriptedProber, ScriptedResource};

/// Operations against the booking system.
///
/// Calls are made one at a time within a session: claiming is stateful
/// (select desk, select date, confirm).
#[async_trait]
pub trait AvailabilityProber: Send + Sync {
    /// Check that the booking system is reachable and the session is usable.
    async fn establish_session(&self) -> Result<(), ProbeError> {
        Ok(())
    }

    /// Every date currently offered for `resource`, in whatever order the
    /// booking system lists them.
    async fn list_visible_slots(&self, resource: &Resource) -> Result<Vec<Slot>, ProbeError>;

    /// Try to hold `date` on `resource`. A conflicted attempt must be rolled
    /// back before returning.
    async fn attempt_claim(&self, resource: &Resource, date: chrono::NaiveDate) -> ClaimOutcome;

    /// Finalize every claim made on `resource` since its last confirmation.
    async fn confirm_batch(&self, resource: &Resource) -> Result<(), ProbeError>;

    /// The booking system's own view of claims held by this user.
    async fn list_my_claims(&self) -> Result<Vec<ClaimRow>, ProbeError>;

    /// Give up the claim held on `date` for `resource`.
    async fn cancel_claim(&self, resource: &Resource, date: chrono::NaiveDate) -> Result<(), ProbeError>;
}
