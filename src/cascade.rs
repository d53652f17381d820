//! Allocation cascade - claims dates desk by desk, in preference order.
//!
//! Availability is desk-specific and only visible by probing, and claims
//! race with other people. So a conflict only rules out one (desk, date)
//! pair: the date stays pending and is offered to the next desk.
//!
//! Per desk:
//! 1. List visible slots and intersect with the pending dates, earliest first
//! 2. Attempt each date once; confirmed dates go to the ledger and leave the pending set
//! 3. If anything was confirmed, finalize the desk before moving on
//! 4. Stop when nothing is pending or the desks run out

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveDate};

use crate::domain::{ClaimAttempt, ClaimOutcome, LedgerEntry, Resource};
use crate::error::ProbeError;
use crate::ledger::Ledger;
use crate::prober::AvailabilityProber;
use crate::report::ResourceBreakdown;

/// Deadlines for calls into the booking system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Session check, slot listing, and "my claims" listing
    pub probe: Duration,
    pub claim: Duration,
    pub confirm: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(90),
            claim: Duration::from_secs(30),
            confirm: Duration::from_secs(120),
        }
    }
}

/// Run `call` with a deadline, folding an elapsed deadline into `ProbeError::Timeout`.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(limit.as_millis() as u64)),
    }
}

/// Cooperative cancellation, honored between desks only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// State left behind by a cascade.
#[derive(Debug, Clone, Default)]
pub struct CascadeOutcome {
    pub per_resource: Vec<ResourceBreakdown>,
    pub attempts: Vec<ClaimAttempt>,
    /// Dates still unclaimed, ascending
    pub pending: BTreeSet<NaiveDate>,
    pub cancelled: bool,
}

impl CascadeOutcome {
    pub fn confirmed_count(&self) -> usize {
        self.per_resource.iter().map(|b| b.confirmed.len()).sum()
    }
}

/// The allocation cascade over one prober session.
pub struct AllocationCascade<P, L>
where
    P: AvailabilityProber + ?Sized,
    L: Ledger + ?Sized,
{
    prober: Arc<P>,
    ledger: Arc<L>,
    timeouts: Timeouts,
    cancel: CancelToken,
}

impl<P, L> AllocationCascade<P, L>
where
    P: AvailabilityProber + ?Sized,
    L: Ledger + ?Sized,
{
    pub fn new(prober: Arc<P>, ledger: Arc<L>, timeouts: Timeouts, cancel: CancelToken) -> Self {
        Self {
            prober,
            ledger,
            timeouts,
            cancel,
        }
    }

    /// Offer `candidates` to `resources` in priority order.
    pub async fn run(&self, resources: &[Resource], candidates: &[NaiveDate]) -> CascadeOutcome {
        let mut outcome = CascadeOutcome {
            pending: candidates.iter().copied().collect(),
            ..Default::default()
        };

        for (index, resource) in resources.iter().enumerate() {
            if outcome.pending.is_empty() {
                break;
            }
            if self.cancel.is_cancelled() {
                tracing::info!(
                    resource = %resource,
                    pending = outcome.pending.len(),
                    "Cancelled before trying next resource"
                );
                outcome.cancelled = true;
                break;
            }

            tracing::info!(
                resource = %resource,
                attempt = index + 1,
                of = resources.len(),
                pending = outcome.pending.len(),
                "Trying resource"
            );

            let breakdown = self
                .try_resource(resource, &mut outcome.pending, &mut outcome.attempts)
                .await;
            outcome.per_resource.push(breakdown);
        }

        if outcome.pending.is_empty() {
            tracing::info!(confirmed = outcome.confirmed_count(), "All candidate dates claimed");
        } else if !outcome.cancelled {
            tracing::warn!(
                confirmed = outcome.confirmed_count(),
                pending = outcome.pending.len(),
                "Resources exhausted with dates still pending"
            );
        }

        outcome
    }

    async fn try_resource(
        &self,
        resource: &Resource,
        pending: &mut BTreeSet<NaiveDate>,
        attempts: &mut Vec<ClaimAttempt>,
    ) -> ResourceBreakdown {
        let mut breakdown = ResourceBreakdown::new(resource.clone());

        let slots = match bounded(self.timeouts.probe, self.prober.list_visible_slots(resource)).await {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(resource = %resource, error = %e, "Could not list slots, skipping resource");
                breakdown.probe_error = Some(e);
                return breakdown;
            }
        };

        // Listing order is not trusted; the set sorts by date.
        let visible: BTreeSet<NaiveDate> = slots
            .iter()
            .filter(|slot| slot.visible && slot.resource == *resource)
            .map(|slot| slot.date)
            .collect();
        breakdown.visible = visible.len();

        let to_attempt: Vec<NaiveDate> = visible.intersection(pending).copied().collect();
        if to_attempt.is_empty() {
            tracing::debug!(resource = %resource, visible = visible.len(), "No pending dates visible");
            return breakdown;
        }

        for date in to_attempt {
            let outcome = bounded(self.timeouts.claim, async {
                Ok::<_, ProbeError>(self.prober.attempt_claim(resource, date).await)
            })
            .await
            .unwrap_or_else(ClaimOutcome::Error);

            match &outcome {
                ClaimOutcome::Confirmed => {
                    tracing::info!(resource = %resource, date = %date, "Claim confirmed");
                    self.record(resource, date, &mut breakdown);
                    pending.remove(&date);
                    breakdown.confirmed.push(date);
                }
                ClaimOutcome::Conflicted => {
                    tracing::info!(resource = %resource, date = %date, "Date taken, left for next resource");
                    breakdown.conflicted.push(date);
                }
                ClaimOutcome::Error(e) => {
                    tracing::warn!(resource = %resource, date = %date, error = %e, "Claim attempt failed");
                    breakdown.errored.push(date);
                }
            }

            attempts.push(ClaimAttempt {
                resource: resource.clone(),
                date,
                outcome,
            });
        }

        if !breakdown.confirmed.is_empty() {
            match bounded(self.timeouts.confirm, self.prober.confirm_batch(resource)).await {
                Ok(()) => {
                    tracing::info!(resource = %resource, claims = breakdown.confirmed.len(), "Claims finalized");
                }
                Err(e) => {
                    tracing::warn!(resource = %resource, error = %e, "Finalizing claims failed");
                    breakdown.confirm_error = Some(e);
                }
            }
        }

        tracing::info!(
            resource = %resource,
            confirmed = breakdown.confirmed.len(),
            conflicted = breakdown.conflicted.len(),
            errored = breakdown.errored.len(),
            pending = pending.len(),
            "Resource done"
        );

        breakdown
    }

    fn record(&self, resource: &Resource, date: NaiveDate, breakdown: &mut ResourceBreakdown) {
        let entry = LedgerEntry::confirmed(resource.clone(), date, Local::now().naive_local());
        match self.ledger.upsert(&entry) {
            Ok(outcome) if !outcome.wrote() => {
                tracing::debug!(resource = %resource, date = %date, "Claim already in ledger");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    resource = %resource,
                    date = %date,
                    error = %e,
                    "Claim held by booking system but not recorded in ledger"
                );
                breakdown.ledger_gaps.push(date);
            }
        }
    }
}
