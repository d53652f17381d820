//! Claims ledger - durable, idempotent record of confirmed claims.
//!
//! The ledger is the source of truth for "what this user already holds".
//! Its latest future date becomes the planning floor of the next run, so
//! a desk/date pair is never attempted twice.

mod sqlite;

use chrono::NaiveDate;

use crate::domain::{LedgerEntry, Resource};
use crate::error::LedgerError;

pub use sqlite::SqliteLedger;

/// What an upsert did to the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new (date, resource) claim was recorded
    Inserted,
    /// An existing record for the key was refreshed with different content
    Replaced,
    /// Identical content already stored; nothing written
    Unchanged,
}

impl UpsertOutcome {
    pub fn wrote(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Storage contract for confirmed claims.
///
/// Implementations must be safe to share between sessions: concurrent
/// upserts of the same key are idempotent.
pub trait Ledger: Send + Sync {
    /// Record a confirmed claim, idempotent under its uniqueness key.
    fn upsert(&self, entry: &LedgerEntry) -> Result<UpsertOutcome, LedgerError>;

    /// Maximum target date among entries dated `today` or later.
    fn latest_confirmed_on_or_after(&self, today: NaiveDate) -> Result<Option<NaiveDate>, LedgerError>;

    /// All entries, latest target date first.
    fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Entries with `from <= target_date <= to`, earliest first.
    fn entries_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<LedgerEntry>, LedgerError>;

    fn count(&self) -> Result<usize, LedgerError>;

    /// Forget every entry for `resource` on `date`, returning how many were
    /// removed. Only called after the booking system released the claim.
    fn release(&self, resource: &Resource, date: NaiveDate) -> Result<usize, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_outcome_wrote() {
        assert!(UpsertOutcome::Inserted.wrote());
        assert!(UpsertOutcome::Replaced.wrote());
        assert!(!UpsertOutcome::Unchanged.wrote());
    }
}
