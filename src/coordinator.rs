//! Run coordinator - one full allocation run.
//!
//! Phases, in order:
//! 1. Establish the booking system session (fatal on failure)
//! 2. Import the booking system's own claims list into the ledger (best effort)
//! 3. Read the ledger floor and plan candidate dates
//! 4. Run the allocation cascade
//! 5. Import the claims list again so claims that were held despite an
//!    error reach the ledger, and count those dates as claimed
//!
//! Cancelling held claims is a separate operation and never part of a run.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{Local, NaiveDate};

use crate::cascade::{AllocationCascade, CancelToken, Timeouts, bounded};
use crate::domain::{RowLayout, Resource, WeekdaySet};
use crate::error::{HotdeskError, ProbeError, Result};
use crate::ledger::{Ledger, UpsertOutcome};
use crate::planner::{Horizon, plan_candidates};
use crate::prober::AvailabilityProber;
use crate::report::{CancelSummary, ReconcileSummary, RunReport};

/// Phase a run is in, used for log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Session,
    InitialSync,
    Planning,
    Cascade,
    Reconcile,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Session => "session",
            RunPhase::InitialSync => "initial-sync",
            RunPhase::Planning => "planning",
            RunPhase::Cascade => "cascade",
            RunPhase::Reconcile => "reconcile",
        };
        f.write_str(name)
    }
}

/// Drives a run against one prober and one ledger.
pub struct RunCoordinator<P, L>
where
    P: AvailabilityProber + ?Sized,
    L: Ledger + ?Sized,
{
    prober: Arc<P>,
    ledger: Arc<L>,
    timeouts: Timeouts,
    layout: RowLayout,
    cancel: CancelToken,
    today: Option<NaiveDate>,
}

impl<P, L> RunCoordinator<P, L>
where
    P: AvailabilityProber + ?Sized,
    L: Ledger + ?Sized,
{
    pub fn new(prober: Arc<P>, ledger: Arc<L>) -> Self {
        Self {
            prober,
            ledger,
            timeouts: Timeouts::default(),
            layout: RowLayout::default(),
            cancel: CancelToken::new(),
            today: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_layout(mut self, layout: RowLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Pin "today" instead of reading the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Check the booking system session within the probe deadline.
    pub async fn establish_session(&self) -> Result<()> {
        bounded(self.timeouts.probe, self.prober.establish_session())
            .await
            .map_err(|e| HotdeskError::Session(e.to_string()))
    }

    /// Run one allocation.
    ///
    /// Only a failed session or an unreadable ledger floor is an error; every
    /// per-desk and per-date failure ends up in the report instead.
    pub async fn run_allocation(
        &self,
        resources: &[Resource],
        weekdays: &WeekdaySet,
        horizon_days: u32,
    ) -> Result<RunReport> {
        let today = self.today();
        let mut report = RunReport::new(today);

        tracing::info!(phase = %RunPhase::Session, resources = resources.len(), weekdays = %weekdays, "Starting run");
        self.establish_session().await?;

        report.initial_sync = self.sync_logged(RunPhase::InitialSync, today).await;

        let floor = self.ledger.latest_confirmed_on_or_after(today)?;
        let candidates = plan_candidates(floor, weekdays, Horizon::Days(horizon_days), today)?;
        tracing::info!(
            phase = %RunPhase::Planning,
            floor = ?floor,
            candidates = candidates.len(),
            "Planned candidate dates"
        );
        report.floor = floor;
        report.candidates = candidates.clone();

        if candidates.is_empty() {
            tracing::info!("Nothing to claim in the window");
            return Ok(report);
        }

        tracing::info!(phase = %RunPhase::Cascade, "Running cascade");
        let cascade = AllocationCascade::new(
            Arc::clone(&self.prober),
            Arc::clone(&self.ledger),
            self.timeouts,
            self.cancel.clone(),
        );
        let outcome = cascade.run(resources, &candidates).await;

        report.confirmed_count = outcome.confirmed_count();
        report.pending = outcome.pending.iter().copied().collect();
        report.pending_count = report.pending.len();
        report.per_resource = outcome.per_resource;
        report.cancelled = outcome.cancelled;

        if !outcome.attempts.is_empty() {
            report.reconciliation = self.sync_logged(RunPhase::Reconcile, today).await;
            if report.reconciliation.is_some() {
                self.collect_recovered(&mut report);
            }
        }

        tracing::info!(
            confirmed = report.confirmed_count,
            recovered = report.recovered.len(),
            pending = report.pending_count,
            cancelled = report.cancelled,
            "Run finished"
        );
        Ok(report)
    }

    /// Move pending dates the ledger now holds into `recovered`.
    ///
    /// Candidates all lie past the floor, so a ledger entry on a pending date
    /// can only come from the reconciliation import.
    fn collect_recovered(&self, report: &mut RunReport) {
        let mut still_pending = Vec::new();
        for date in std::mem::take(&mut report.pending) {
            match self.ledger.entries_between(date, date) {
                Ok(entries) => match entries.into_iter().next() {
                    Some(entry) => {
                        tracing::info!(
                            phase = %RunPhase::Reconcile,
                            resource = %entry.resource,
                            date = %date,
                            "Recovered claim held despite a failed attempt"
                        );
                        report.recovered.push((entry.resource, date));
                    }
                    None => still_pending.push(date),
                },
                Err(e) => {
                    tracing::warn!(date = %date, error = %e, "Could not check ledger for a pending date");
                    still_pending.push(date);
                }
            }
        }
        report.pending = still_pending;
        report.pending_count = report.pending.len();
    }

    /// Give back every claim the booking system lists in `from..=to`.
    ///
    /// Past claims are left alone. Each released claim is removed from the
    /// ledger so the floor reflects what is still held. A claim the booking
    /// system refuses to release is reported and stays in the ledger.
    pub async fn cancel_claims(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<CancelSummary> {
        let today = self.today();
        self.establish_session().await?;

        let rows = bounded(self.timeouts.probe, self.prober.list_my_claims()).await?;
        let queried_at = Local::now().naive_local();
        let mut summary = CancelSummary::default();

        let mut held = BTreeSet::new();
        for row in &rows {
            let entry = match self.layout.parse(row, queried_at) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, cells = row.cells.len(), "Skipping unparsable claims row");
                    summary.invalid += 1;
                    continue;
                }
            };
            if entry.target_date < today {
                summary.skipped_past += 1;
                continue;
            }
            let in_range =
                from.is_none_or(|f| entry.target_date >= f) && to.is_none_or(|t| entry.target_date <= t);
            if in_range {
                held.insert((entry.target_date, entry.resource));
            }
        }

        tracing::info!(claims = held.len(), from = ?from, to = ?to, "Cancelling claims");
        for (date, resource) in held {
            if let Err(e) = bounded(self.timeouts.claim, self.prober.cancel_claim(&resource, date)).await {
                tracing::warn!(resource = %resource, date = %date, error = %e, "Cancellation failed");
                summary.failed.push((resource, date, e));
                continue;
            }

            tracing::info!(resource = %resource, date = %date, "Claim cancelled");
            match self.ledger.release(&resource, date) {
                Ok(removed) => summary.released += removed,
                Err(e) => {
                    tracing::error!(
                        resource = %resource,
                        date = %date,
                        error = %e,
                        "Claim released but still in ledger"
                    );
                    summary.ledger_failed += 1;
                }
            }
            summary.cancelled.push((resource, date));
        }

        Ok(summary)
    }

    /// Import the booking system's claims list into the ledger.
    ///
    /// Rows dated before today are skipped. Unparsable rows and ledger write
    /// failures are counted, not raised.
    pub async fn sync_claims(&self) -> std::result::Result<ReconcileSummary, ProbeError> {
        self.sync_claims_as_of(self.today()).await
    }

    async fn sync_claims_as_of(&self, today: NaiveDate) -> std::result::Result<ReconcileSummary, ProbeError> {
        let rows = bounded(self.timeouts.probe, self.prober.list_my_claims()).await?;
        let queried_at = Local::now().naive_local();
        let mut summary = ReconcileSummary::default();

        for row in &rows {
            let entry = match self.layout.parse(row, queried_at) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, cells = row.cells.len(), "Skipping unparsable claims row");
                    summary.invalid += 1;
                    continue;
                }
            };

            if entry.target_date < today {
                summary.skipped_past += 1;
                continue;
            }

            match self.ledger.upsert(&entry) {
                Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
                Ok(UpsertOutcome::Replaced) => summary.replaced += 1,
                Ok(UpsertOutcome::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    tracing::error!(
                        resource = %entry.resource,
                        date = %entry.target_date,
                        error = %e,
                        "Failed to record listed claim"
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn sync_logged(&self, phase: RunPhase, today: NaiveDate) -> Option<ReconcileSummary> {
        match self.sync_claims_as_of(today).await {
            Ok(summary) => {
                tracing::info!(
                    phase = %phase,
                    recorded = summary.recorded(),
                    inserted = summary.inserted,
                    replaced = summary.replaced,
                    unchanged = summary.unchanged,
                    skipped_past = summary.skipped_past,
                    invalid = summary.invalid,
                    failed = summary.failed,
                    "Claims list imported"
                );
                Some(summary)
            }
            Err(e) => {
                tracing::warn!(phase = %phase, error = %e, "Could not import claims list");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClaimRow, LedgerEntry};
    use crate::error::LedgerError;
    use crate::ledger::SqliteLedger;
    use crate::prober::{ProberCall, ScriptedOutcome, ScriptedProber, ScriptedResource};
    use crate::report::RunStatus;

    struct UnreadableLedger;

    impl Ledger for UnreadableLedger {
        fn upsert(&self, _entry: &LedgerEntry) -> std::result::Result<UpsertOutcome, LedgerError> {
            Ok(UpsertOutcome::Inserted)
        }

        fn latest_confirmed_on_or_after(&self, _today: NaiveDate) -> std::result::Result<Option<NaiveDate>, LedgerError> {
            Err(LedgerError::Corrupt("target_date '02/05/2024'".to_string()))
        }

        fn entries(&self) -> std::result::Result<Vec<LedgerEntry>, LedgerError> {
            Ok(Vec::new())
        }

        fn entries_between(&self, _from: NaiveDate, _to: NaiveDate) -> std::result::Result<Vec<LedgerEntry>, LedgerError> {
            Ok(Vec::new())
        }

        fn count(&self) -> std::result::Result<usize, LedgerError> {
            Ok(0)
        }

        fn release(&self, _resource: &Resource, _date: NaiveDate) -> std::result::Result<usize, LedgerError> {
            Ok(0)
        }
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn listed(resource: &str, day: &str) -> ClaimRow {
        ClaimRow::new([resource, "Staff", "Confirmada", "", "", "", "", day])
    }

    fn wed_thu() -> WeekdaySet {
        WeekdaySet::from_indices([2, 3])
    }

    // 2024-05-01 is a Wednesday.
    fn coordinator(prober: ScriptedProber) -> (RunCoordinator<ScriptedProber, SqliteLedger>, Arc<ScriptedProber>, Arc<SqliteLedger>) {
        let prober = Arc::new(prober);
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let coordinator = RunCoordinator::new(Arc::clone(&prober), Arc::clone(&ledger)).with_today(date(5, 1));
        (coordinator, prober, ledger)
    }

    #[tokio::test]
    async fn test_session_failure_is_fatal() {
        let (coordinator, prober, _) = coordinator(ScriptedProber::new().with_session_error("login page unreachable"));
        let result = coordinator.run_allocation(&[Resource::from("P17-1001")], &wed_thu(), 7).await;

        assert!(matches!(result, Err(HotdeskError::Session(_))));
        assert_eq!(prober.calls(), vec![ProberCall::Session]);
    }

    #[tokio::test]
    async fn test_initial_sync_raises_floor() {
        let prober = ScriptedProber::new()
            .with_listed_claim(listed("P17-1001", "02/05/2024"))
            .with_resource("P17-1001", ScriptedResource::visible([date(5, 1), date(5, 2), date(5, 8)]));
        let (coordinator, prober, ledger) = coordinator(prober);

        let report = coordinator
            .run_allocation(&[Resource::from("P17-1001")], &wed_thu(), 7)
            .await
            .unwrap();

        assert_eq!(report.floor, Some(date(5, 2)));
        assert_eq!(report.candidates, vec![date(5, 8)]);
        assert_eq!(report.initial_sync.map(|s| s.inserted), Some(1));
        assert_eq!(prober.attempts(), vec![(Resource::from("P17-1001"), date(5, 8))]);
        assert_eq!(ledger.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_initial_sync_is_not_fatal() {
        let prober = ScriptedProber::new()
            .failing_my_claims()
            .with_resource("P17-1001", ScriptedResource::visible([date(5, 1)]));
        let (coordinator, _, _) = coordinator(prober);

        let report = coordinator
            .run_allocation(&[Resource::from("P17-1001")], &wed_thu(), 0)
            .await
            .unwrap();

        assert!(report.initial_sync.is_none());
        assert!(report.reconciliation.is_none());
        assert_eq!(report.confirmed_count, 1);
    }

    #[tokio::test]
    async fn test_empty_window_skips_cascade() {
        let prober = ScriptedProber::new().with_listed_claim(listed("P17-1001", "09/05/2024"));
        let (coordinator, prober, _) = coordinator(prober);

        let report = coordinator
            .run_allocation(&[Resource::from("P17-1001")], &wed_thu(), 7)
            .await
            .unwrap();

        assert!(report.candidates.is_empty());
        assert!(prober.attempts().is_empty());
        assert!(!prober.calls().contains(&ProberCall::ListSlots(Resource::from("P17-1001"))));
    }

    #[tokio::test]
    async fn test_reconcile_recovers_claim_held_despite_error() {
        let prober = ScriptedProber::new().with_resource(
            "P17-1001",
            ScriptedResource::visible([date(5, 2)]).outcome(date(5, 2), ScriptedOutcome::ErrorHeld),
        );
        let (coordinator, _, ledger) = coordinator(prober);

        let report = coordinator
            .run_allocation(&[Resource::from("P17-1001")], &WeekdaySet::from_indices([3]), 1)
            .await
            .unwrap();

        assert_eq!(report.confirmed_count, 0);
        assert_eq!(report.per_resource[0].errored, vec![date(5, 2)]);
        assert_eq!(report.reconciliation.map(|s| s.inserted), Some(1));
        assert_eq!(report.recovered, vec![(Resource::from("P17-1001"), date(5, 2))]);
        assert!(report.pending.is_empty());
        assert_eq!(report.pending_count, 0);
        assert_eq!(report.claimed_count(), 1);
        assert_eq!(report.status(), RunStatus::Complete);
        assert_eq!(ledger.latest_confirmed_on_or_after(date(5, 1)).unwrap(), Some(date(5, 2)));
    }

    #[tokio::test]
    async fn test_failed_attempt_not_listed_stays_pending() {
        let prober = ScriptedProber::new().with_resource(
            "P17-1001",
            ScriptedResource::visible([date(5, 1), date(5, 2)]).outcome(date(5, 2), ScriptedOutcome::Error),
        );
        let (coordinator, _, _) = coordinator(prober);

        let report = coordinator
            .run_allocation(&[Resource::from("P17-1001")], &wed_thu(), 1)
            .await
            .unwrap();

        assert!(report.recovered.is_empty());
        assert_eq!(report.pending, vec![date(5, 2)]);
        assert_eq!(report.status(), RunStatus::Partial);
    }

    #[tokio::test]
    async fn test_unreadable_floor_is_fatal() {
        let prober = Arc::new(
            ScriptedProber::new().with_resource("P17-1001", ScriptedResource::visible([date(5, 1)])),
        );
        let coordinator = RunCoordinator::new(Arc::clone(&prober), Arc::new(UnreadableLedger)).with_today(date(5, 1));

        let result = coordinator.run_allocation(&[Resource::from("P17-1001")], &wed_thu(), 7).await;

        assert!(matches!(result, Err(HotdeskError::Ledger(LedgerError::Corrupt(_)))));
        assert!(prober.attempts().is_empty());
        assert!(!prober.calls().contains(&ProberCall::ListSlots(Resource::from("P17-1001"))));
    }

    #[tokio::test]
    async fn test_cancel_claims_releases_ledger_rows() {
        let prober = ScriptedProber::new()
            .with_listed_claim(listed("P17-1001", "30/04/2024"))
            .with_listed_claim(listed("P17-1001", "02/05/2024"))
            .with_listed_claim(listed("P17-1002", "08/05/2024"))
            .with_listed_claim(ClaimRow::new(["P17-1001"]));
        let (coordinator, prober, ledger) = coordinator(prober);
        coordinator.sync_claims().await.unwrap();
        assert_eq!(ledger.count().unwrap(), 2);

        let summary = coordinator.cancel_claims(None, None).await.unwrap();

        assert_eq!(
            summary.cancelled,
            vec![(Resource::from("P17-1001"), date(5, 2)), (Resource::from("P17-1002"), date(5, 8))]
        );
        assert_eq!(summary.released, 2);
        assert_eq!(summary.skipped_past, 1);
        assert_eq!(summary.invalid, 1);
        assert!(summary.failed.is_empty());
        assert_eq!(ledger.count().unwrap(), 0);
        assert_eq!(ledger.latest_confirmed_on_or_after(date(5, 1)).unwrap(), None);
        assert!(!prober.calls().contains(&ProberCall::Cancel(Resource::from("P17-1001"), date(4, 30))));
    }

    #[tokio::test]
    async fn test_cancel_claims_in_range_keeps_refused_claim() {
        let prober = ScriptedProber::new()
            .with_resource("P17-1002", ScriptedResource::default().failing_cancel())
            .with_listed_claim(listed("P17-1001", "02/05/2024"))
            .with_listed_claim(listed("P17-1001", "08/05/2024"))
            .with_listed_claim(listed("P17-1002", "09/05/2024"))
            .with_listed_claim(listed("P17-1001", "15/05/2024"));
        let (coordinator, _, ledger) = coordinator(prober);
        coordinator.sync_claims().await.unwrap();

        let summary = coordinator
            .cancel_claims(Some(date(5, 8)), Some(date(5, 9)))
            .await
            .unwrap();

        assert_eq!(summary.cancelled, vec![(Resource::from("P17-1001"), date(5, 8))]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, Resource::from("P17-1002"));
        assert_eq!(summary.failed[0].1, date(5, 9));

        let left: Vec<NaiveDate> = ledger.entries().unwrap().iter().map(|e| e.target_date).collect();
        assert_eq!(left, vec![date(5, 15), date(5, 9), date(5, 2)]);
    }

    #[tokio::test]
    async fn test_cancel_claims_listing_failure_is_probe_error() {
        let (coordinator, prober, _) = coordinator(ScriptedProber::new().failing_my_claims());
        let result = coordinator.cancel_claims(None, None).await;

        assert!(matches!(result, Err(HotdeskError::Probe(ProbeError::Timeout(_)))));
        assert_eq!(prober.calls(), vec![ProberCall::Session, ProberCall::ListMyClaims]);
    }

    #[tokio::test]
    async fn test_sync_counts_past_and_invalid_rows() {
        let prober = ScriptedProber::new()
            .with_listed_claim(listed("P17-1001", "30/04/2024"))
            .with_listed_claim(listed("P17-1001", "not a date"))
            .with_listed_claim(ClaimRow::new(["P17-1001"]))
            .with_listed_claim(listed("P17-1002", "01/05/2024"));
        let (coordinator, _, ledger) = coordinator(prober);

        let summary = coordinator.sync_claims().await.unwrap();
        assert_eq!(summary.skipped_past, 1);
        assert_eq!(summary.invalid, 2);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.total(), 4);
        assert_eq!(ledger.count().unwrap(), 1);

        let again = coordinator.sync_claims().await.unwrap();
        assert_eq!(again.unchanged, 1);
        assert_eq!(again.inserted, 0);
    }

    #[tokio::test]
    async fn test_establish_session_maps_to_session_error() {
        let (coordinator, _, _) = coordinator(ScriptedProber::new().with_session_error("expired"));
        let err = coordinator.establish_session().await.unwrap_err();
        assert_eq!(err.to_string(), "Session error: transport: expired");
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(RunPhase::InitialSync.to_string(), "initial-sync");
        assert_eq!(RunPhase::Reconcile.to_string(), "reconcile");
    }
}
