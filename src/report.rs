//! Run reports.

use chrono::NaiveDate;

use crate::domain::Resource;
use crate::error::ProbeError;

/// What happened on one desk during the cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBreakdown {
    pub resource: Resource,
    /// Dates the booking system listed as selectable
    pub visible: usize,
    pub confirmed: Vec<NaiveDate>,
    pub conflicted: Vec<NaiveDate>,
    pub errored: Vec<NaiveDate>,
    /// Confirmed externally but the ledger write failed
    pub ledger_gaps: Vec<NaiveDate>,
    /// The slot listing itself failed; nothing was attempted
    pub probe_error: Option<ProbeError>,
    pub confirm_error: Option<ProbeError>,
}

impl ResourceBreakdown {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            visible: 0,
            confirmed: Vec::new(),
            conflicted: Vec::new(),
            errored: Vec::new(),
            ledger_gaps: Vec::new(),
            probe_error: None,
            confirm_error: None,
        }
    }

    pub fn attempted(&self) -> usize {
        self.confirmed.len() + self.conflicted.len() + self.errored.len()
    }
}

/// Result of importing the booking system's "my claims" view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Rows the ledger did not know about
    pub inserted: usize,
    /// Rows that refreshed an existing record
    pub replaced: usize,
    pub unchanged: usize,
    /// Rows dated before today
    pub skipped_past: usize,
    /// Rows that could not be parsed
    pub invalid: usize,
    /// Rows the ledger refused to store
    pub failed: usize,
}

impl ReconcileSummary {
    pub fn recorded(&self) -> usize {
        self.inserted + self.replaced
    }

    pub fn total(&self) -> usize {
        self.inserted + self.replaced + self.unchanged + self.skipped_past + self.invalid + self.failed
    }
}

/// Result of giving held claims back to the booking system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelSummary {
    /// Claims the booking system released, earliest first
    pub cancelled: Vec<(Resource, NaiveDate)>,
    pub failed: Vec<(Resource, NaiveDate, ProbeError)>,
    /// Ledger rows removed for released claims
    pub released: usize,
    /// Released claims whose ledger rows could not be removed
    pub ledger_failed: usize,
    pub skipped_past: usize,
    pub invalid: usize,
}

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every candidate date was claimed
    Complete,
    /// Some dates claimed, some still pending
    Partial,
    /// Candidates existed but none could be claimed
    NothingClaimed,
    /// No candidate dates in the window
    NothingToDo,
}

/// Everything a run did, always produced once the session is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub today: NaiveDate,
    pub floor: Option<NaiveDate>,
    pub candidates: Vec<NaiveDate>,
    pub confirmed_count: usize,
    pub pending_count: usize,
    pub pending: Vec<NaiveDate>,
    /// Claims the cascade gave up on that the booking system listed anyway
    pub recovered: Vec<(Resource, NaiveDate)>,
    pub per_resource: Vec<ResourceBreakdown>,
    pub initial_sync: Option<ReconcileSummary>,
    pub reconciliation: Option<ReconcileSummary>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            floor: None,
            candidates: Vec::new(),
            confirmed_count: 0,
            pending_count: 0,
            pending: Vec::new(),
            recovered: Vec::new(),
            per_resource: Vec::new(),
            initial_sync: None,
            reconciliation: None,
            cancelled: false,
        }
    }

    /// Dates held at the end of the run, confirmed or recovered.
    pub fn claimed_count(&self) -> usize {
        self.confirmed_count + self.recovered.len()
    }

    pub fn status(&self) -> RunStatus {
        if self.candidates.is_empty() {
            RunStatus::NothingToDo
        } else if self.claimed_count() == 0 {
            RunStatus::NothingClaimed
        } else if self.pending_count == 0 {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        }
    }

    /// (desk, date) pairs held externally but missing from the ledger.
    pub fn ledger_gaps(&self) -> Vec<(Resource, NaiveDate)> {
        self.per_resource
            .iter()
            .flat_map(|b| b.ledger_gaps.iter().map(move |d| (b.resource.clone(), *d)))
            .collect()
    }

    /// Confirmed dates per desk, in cascade order.
    pub fn assignments(&self) -> Vec<(Resource, NaiveDate)> {
        self.per_resource
            .iter()
            .flat_map(|b| b.confirmed.iter().map(move |d| (b.resource.clone(), *d)))
            .collect()
    }
}
