//! Domain types for hotdesk
//!
//! - Resource, WeekdaySet, Slot: what can be claimed and when
//! - ClaimOutcome, ClaimAttempt: result of one claim attempt
//! - LedgerEntry, ClaimRow, RowLayout: durable record of a confirmed claim

pub mod entry;
pub mod outcome;
pub mod resource;

pub use entry::{CELL_SEPARATOR, ClaimRow, FIELD_COUNT, LedgerEntry, RowError, RowLayout};
pub use outcome::{ClaimAttempt, ClaimOutcome};
pub use resource::{Resource, Slot, WeekdaySet, weekday_index};
