//! Scripted prober - replays a fixture instead of talking to a booking system.
//!
//! Each desk lists a set of dates and, optionally, the outcome each claim
//! attempt should produce (confirmed by default). Claims become visible in
//! `list_my_claims` once the desk is confirmed, which is how the real system
//! behaves. Every call is recorded so tests can assert on the sequence.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AvailabilityProber;
use crate::domain::{ClaimOutcome, ClaimRow, Resource, RowLayout, Slot};
use crate::error::ProbeError;

/// Outcome a scripted claim attempt produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedOutcome {
    #[default]
    Confirmed,
    Conflicted,
    /// Transport failure; nothing was held
    Error,
    /// Transport failure, but the booking system did take the claim
    ErrorHeld,
}

/// Script for one desk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedResource {
    /// Dates listed as selectable, in listing order
    pub slots: Vec<NaiveDate>,
    /// Dates listed but not selectable
    pub hidden: Vec<NaiveDate>,
    /// Outcome per date; missing dates confirm
    pub outcomes: BTreeMap<NaiveDate, ScriptedOutcome>,
    pub fail_listing: bool,
    pub fail_confirm: bool,
    pub fail_cancel: bool,
    /// Artificial latency of each claim attempt
    pub attempt_delay_ms: u64,
}

impl ScriptedResource {
    pub fn visible(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            slots: dates.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn outcome(mut self, date: NaiveDate, outcome: ScriptedOutcome) -> Self {
        self.outcomes.insert(date, outcome);
        self
    }

    pub fn hidden(mut self, date: NaiveDate) -> Self {
        self.hidden.push(date);
        self
    }

    pub fn failing_confirm(mut self) -> Self {
        self.fail_confirm = true;
        self
    }

    pub fn failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn delayed(mut self, delay_ms: u64) -> Self {
        self.attempt_delay_ms = delay_ms;
        self
    }
}

/// A full fixture as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    /// When set, `establish_session` fails with this message
    pub session_error: Option<String>,
    pub resources: BTreeMap<Resource, ScriptedResource>,
    /// Claims the booking system already lists before the run
    pub my_claims: Vec<ClaimRow>,
    pub fail_my_claims: bool,
    /// Layout used for rows this prober reports
    pub layout: RowLayout,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProberCall {
    Session,
    ListSlots(Resource),
    Attempt(Resource, NaiveDate),
    Confirm(Resource),
    ListMyClaims,
    Cancel(Resource, NaiveDate),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<ProberCall>,
    unconfirmed: BTreeMap<Resource, Vec<NaiveDate>>,
    listed: Vec<ClaimRow>,
}

/// Prober replaying a `Script`.
#[derive(Debug)]
pub struct ScriptedProber {
    script: Script,
    state: Mutex<State>,
}

impl Default for ScriptedProber {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::from_script(Script::default())
    }

    pub fn from_script(script: Script) -> Self {
        let state = State {
            listed: script.my_claims.clone(),
            ..Default::default()
        };
        Self {
            script,
            state: Mutex::new(state),
        }
    }

    /// Load a YAML fixture.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        let script: Script = serde_yaml::from_str(&content).context("Failed to parse fixture")?;
        log::info!("Loaded scripted prober from {}", path.display());
        Ok(Self::from_script(script))
    }

    pub fn with_resource(mut self, resource: impl Into<Resource>, script: ScriptedResource) -> Self {
        self.script.resources.insert(resource.into(), script);
        self
    }

    pub fn with_listed_claim(self, row: ClaimRow) -> Self {
        self.lock().listed.push(row);
        self
    }

    pub fn with_session_error(mut self, message: impl Into<String>) -> Self {
        self.script.session_error = Some(message.into());
        self
    }

    pub fn failing_my_claims(mut self) -> Self {
        self.script.fail_my_claims = true;
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ProberCall> {
        self.lock().calls.clone()
    }

    /// Claim attempts made so far, in order.
    pub fn attempts(&self) -> Vec<(Resource, NaiveDate)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ProberCall::Attempt(resource, date) => Some((resource.clone(), *date)),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: ProberCall) {
        self.lock().calls.push(call);
    }

    /// Row as the booking system would list it.
    fn listed_row(&self, resource: &Resource, date: NaiveDate) -> ClaimRow {
        let layout = &self.script.layout;
        let width = layout.resource_column.max(layout.date_column).max(2) + 1;
        let mut cells = vec![String::new(); width];
        cells[1] = "Staff".to_string();
        cells[2] = "Confirmada".to_string();
        cells[layout.resource_column] = resource.to_string();
        cells[layout.date_column] = date.format(&layout.date_format).to_string();
        ClaimRow { cells }
    }

    fn row_holds(&self, row: &ClaimRow, resource: &Resource, date: NaiveDate) -> bool {
        let layout = &self.script.layout;
        let cell = |i: usize| row.cells.get(i).map(|c| c.trim());
        cell(layout.resource_column) == Some(resource.as_str())
            && cell(layout.date_column).and_then(|c| NaiveDate::parse_from_str(c, &layout.date_format).ok())
                == Some(date)
    }
}

#[async_trait]
impl AvailabilityProber for ScriptedProber {
    async fn establish_session(&self) -> Result<(), ProbeError> {
        self.record(ProberCall::Session);
        match &self.script.session_error {
            Some(message) => Err(ProbeError::Transport(message.clone())),
            None => Ok(()),
        }
    }

    async fn list_visible_slots(&self, resource: &Resource) -> Result<Vec<Slot>, ProbeError> {
        self.record(ProberCall::ListSlots(resource.clone()));
        let Some(script) = self.script.resources.get(resource) else {
            return Ok(Vec::new());
        };
        if script.fail_listing {
            return Err(ProbeError::Unexpected(format!("slot table for {} did not load", resource)));
        }

        let visible = script.slots.iter().map(|d| Slot::new(resource.clone(), *d, true));
        let hidden = script.hidden.iter().map(|d| Slot::new(resource.clone(), *d, false));
        Ok(visible.chain(hidden).collect())
    }

    async fn attempt_claim(&self, resource: &Resource, date: NaiveDate) -> ClaimOutcome {
        self.record(ProberCall::Attempt(resource.clone(), date));
        let script = self.script.resources.get(resource);

        if let Some(delay) = script.map(|s| s.attempt_delay_ms).filter(|ms| *ms > 0) {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let outcome = script
            .and_then(|s| s.outcomes.get(&date).copied())
            .unwrap_or_default();

        match outcome {
            ScriptedOutcome::Confirmed => {
                self.lock().unconfirmed.entry(resource.clone()).or_default().push(date);
                ClaimOutcome::Confirmed
            }
            ScriptedOutcome::Conflicted => ClaimOutcome::Conflicted,
            ScriptedOutcome::Error => ClaimOutcome::Error(ProbeError::Timeout(3000)),
            ScriptedOutcome::ErrorHeld => {
                let row = self.listed_row(resource, date);
                self.lock().listed.push(row);
                ClaimOutcome::Error(ProbeError::Timeout(3000))
            }
        }
    }

    async fn confirm_batch(&self, resource: &Resource) -> Result<(), ProbeError> {
        self.record(ProberCall::Confirm(resource.clone()));
        if self.script.resources.get(resource).is_some_and(|s| s.fail_confirm) {
            return Err(ProbeError::Unexpected("reserve button did not respond".to_string()));
        }

        let dates = self.lock().unconfirmed.remove(resource).unwrap_or_default();
        let rows: Vec<ClaimRow> = dates.into_iter().map(|d| self.listed_row(resource, d)).collect();
        self.lock().listed.extend(rows);
        Ok(())
    }

    async fn list_my_claims(&self) -> Result<Vec<ClaimRow>, ProbeError> {
        self.record(ProberCall::ListMyClaims);
        if self.script.fail_my_claims {
            return Err(ProbeError::Timeout(30000));
        }
        Ok(self.lock().listed.clone())
    }

    async fn cancel_claim(&self, resource: &Resource, date: NaiveDate) -> Result<(), ProbeError> {
        self.record(ProberCall::Cancel(resource.clone(), date));
        if self.script.resources.get(resource).is_some_and(|s| s.fail_cancel) {
            return Err(ProbeError::Unexpected("cancel dialog did not appear".to_string()));
        }

        let mut state = self.lock();
        let before = state.listed.len();
        state.listed.retain(|row| !self.row_holds(row, resource, date));
        if state.listed.len() == before {
            return Err(ProbeError::Unexpected(format!("no claim on {} for {}", resource, date)));
        }
        Ok(())
    }
}
