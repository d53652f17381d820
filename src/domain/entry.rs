//! Ledger entries and the raw rows they are built from.
//!
//! The booking system reports each held desk as a table row of text cells.
//! A `RowLayout` says which cell carries the desk code and which the date;
//! everything else is stored verbatim so nothing the system reported is lost.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::Resource;

/// Number of raw cells the ledger keeps in dedicated columns.
pub const FIELD_COUNT: usize = 10;

/// Separator used when a row is flattened to a single string.
pub const CELL_SEPARATOR: &str = " | ";

/// A row from the booking system's "my claims" listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRow {
    pub cells: Vec<String>,
}

impl ClaimRow {
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cells: cells.into_iter().map(Into::into).collect(),
        }
    }
}

/// Why a reported row could not become a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("row has {len} cells, need at least {needed}")]
    TooShort { len: usize, needed: usize },

    #[error("unparsable date '{0}'")]
    BadDate(String),

    #[error("row has an empty resource cell")]
    EmptyResource,
}

/// Where the interesting cells live in a reported row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowLayout {
    pub resource_column: usize,
    pub date_column: usize,
    pub date_format: String,
}

impl Default for RowLayout {
    fn default() -> Self {
        Self {
            resource_column: 0,
            date_column: 7,
            date_format: "%d/%m/%Y".to_string(),
        }
    }
}

impl RowLayout {
    /// Parse a reported row into a ledger entry stamped with `queried_at`.
    pub fn parse(&self, row: &ClaimRow, queried_at: NaiveDateTime) -> Result<LedgerEntry, RowError> {
        let cells: Vec<String> = row.cells.iter().map(|c| c.trim().to_string()).collect();

        let needed = self.resource_column.max(self.date_column) + 1;
        if cells.len() < needed {
            return Err(RowError::TooShort {
                len: cells.len(),
                needed,
            });
        }

        let resource = &cells[self.resource_column];
        if resource.is_empty() {
            return Err(RowError::EmptyResource);
        }

        let date_text = &cells[self.date_column];
        let target_date = NaiveDate::parse_from_str(date_text, &self.date_format)
            .map_err(|_| RowError::BadDate(date_text.clone()))?;

        Ok(LedgerEntry {
            queried_at,
            target_date,
            resource: Resource::new(resource.clone()),
            cells,
        })
    }
}

/// A confirmed claim as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// When this entry was produced (claim time or listing time)
    pub queried_at: NaiveDateTime,
    pub target_date: NaiveDate,
    pub resource: Resource,
    /// Raw cells as reported; a claim recorded by the cascade only has the desk code
    pub cells: Vec<String>,
}

impl LedgerEntry {
    /// Entry written the moment an attempt comes back confirmed, before the
    /// booking system has listed the full row.
    pub fn confirmed(resource: Resource, target_date: NaiveDate, queried_at: NaiveDateTime) -> Self {
        Self {
            queried_at,
            target_date,
            cells: vec![resource.to_string()],
            resource,
        }
    }

    /// Cell `n` (1-based), empty when the row is shorter.
    pub fn field(&self, n: usize) -> &str {
        n.checked_sub(1)
            .and_then(|i| self.cells.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// The first `FIELD_COUNT` cells, padded with empty strings.
    pub fn padded_fields(&self) -> Vec<String> {
        (1..=FIELD_COUNT).map(|n| self.field(n).to_string()).collect()
    }

    pub fn raw_row(&self) -> String {
        self.cells.join(CELL_SEPARATOR)
    }

    /// Content digest used to tell an identical re-submission from a real change.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.target_date.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.resource.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.raw_row().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True for the desk-code-only entry the cascade writes. A listed row
    /// always carries its date cell, so it never has a single cell.
    pub fn is_placeholder(&self) -> bool {
        self.cells.len() == 1 && self.cells[0] == self.resource.as_str()
    }
}
