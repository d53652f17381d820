//! SQLite-backed ledger.
//!
//! Dates are stored as ISO `YYYY-MM-DD` text so `MAX()` and range queries
//! order correctly. Raw cells are kept both in fixed columns (`field_1` ...
//! `field_10`) and as JSON, so rows of any width round-trip.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use super::{Ledger, UpsertOutcome};
use crate::domain::{LedgerEntry, Resource};
use crate::error::LedgerError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_COLUMNS: &str = "queried_at, target_date, resource, cells_json";

/// Ledger stored in a single SQLite database file.
///
/// `rusqlite::Connection` is not `Sync`, so the connection sits behind a
/// `Mutex`; the UNIQUE constraint serializes writers from other processes.
pub struct SqliteLedger {
    db: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger").finish_non_exhaustive()
    }
}

impl SqliteLedger {
    /// Open or create the ledger at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let db = Connection::open(path)?;
        db.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&db)?;

        log::debug!("Opened ledger at {}", path.display());
        Ok(Self { db: Mutex::new(db) })
    }

    /// In-memory ledger, used by tests and rehearsals.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(db: &Connection) -> Result<(), LedgerError> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS claims (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queried_at TEXT NOT NULL,
                target_date TEXT NOT NULL,
                resource TEXT NOT NULL,
                field_1 TEXT NOT NULL DEFAULT '',
                field_2 TEXT NOT NULL DEFAULT '',
                field_3 TEXT NOT NULL DEFAULT '',
                field_4 TEXT NOT NULL DEFAULT '',
                field_5 TEXT NOT NULL DEFAULT '',
                field_6 TEXT NOT NULL DEFAULT '',
                field_7 TEXT NOT NULL DEFAULT '',
                field_8 TEXT NOT NULL DEFAULT '',
                field_9 TEXT NOT NULL DEFAULT '',
                field_10 TEXT NOT NULL DEFAULT '',
                raw_row TEXT NOT NULL,
                cells_json TEXT NOT NULL,
                row_digest TEXT NOT NULL,
                UNIQUE(target_date, resource, field_2, field_3)
            );

            CREATE INDEX IF NOT EXISTS idx_claims_target_date ON claims(target_date);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.db.lock().map_err(|e| LedgerError::Poisoned(e.to_string()))
    }

    fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode(raw: (String, String, String, String)) -> Result<LedgerEntry, LedgerError> {
        let (queried_at, target_date, resource, cells_json) = raw;
        let queried_at = NaiveDateTime::parse_from_str(&queried_at, TIMESTAMP_FORMAT)
            .map_err(|e| LedgerError::Corrupt(format!("queried_at '{}': {}", queried_at, e)))?;
        let target_date = target_date
            .parse::<NaiveDate>()
            .map_err(|e| LedgerError::Corrupt(format!("target_date '{}': {}", target_date, e)))?;
        let cells: Vec<String> = serde_json::from_str(&cells_json)
            .map_err(|e| LedgerError::Corrupt(format!("cells_json: {}", e)))?;

        Ok(LedgerEntry {
            queried_at,
            target_date,
            resource: Resource::new(resource),
            cells,
        })
    }

    fn query_entries(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<LedgerEntry>, LedgerError> {
        let db = self.lock()?;
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map(args, Self::entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(Self::decode(row?)?);
        }
        Ok(entries)
    }

    fn insert(tx: &Connection, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let fields = entry.padded_fields();
        let cells_json = serde_json::to_string(&entry.cells)
            .map_err(|e| LedgerError::Corrupt(format!("cells_json: {}", e)))?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO claims
            (queried_at, target_date, resource,
             field_1, field_2, field_3, field_4, field_5,
             field_6, field_7, field_8, field_9, field_10,
             raw_row, cells_json, row_digest)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                entry.queried_at.format(TIMESTAMP_FORMAT).to_string(),
                entry.target_date.to_string(),
                entry.resource.as_str(),
                fields[0],
                fields[1],
                fields[2],
                fields[3],
                fields[4],
                fields[5],
                fields[6],
                fields[7],
                fields[8],
                fields[9],
                entry.raw_row(),
                cells_json,
                entry.digest(),
            ],
        )?;
        Ok(())
    }
}

impl Ledger for SqliteLedger {
    fn upsert(&self, entry: &LedgerEntry) -> Result<UpsertOutcome, LedgerError> {
        let mut db = self.lock()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let date = entry.target_date.to_string();
        let resource = entry.resource.as_str();

        let outcome = if entry.is_placeholder() {
            // Any stored row for this (date, resource) already covers a bare claim.
            let existing: Option<String> = tx
                .query_row(
                    "SELECT row_digest FROM claims WHERE target_date = ?1 AND resource = ?2 LIMIT 1",
                    params![date, resource],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                Some(_) => UpsertOutcome::Unchanged,
                None => {
                    Self::insert(&tx, entry)?;
                    UpsertOutcome::Inserted
                }
            }
        } else {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT row_digest FROM claims
                     WHERE target_date = ?1 AND resource = ?2 AND field_2 = ?3 AND field_3 = ?4",
                    params![date, resource, entry.field(2), entry.field(3)],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(digest) if digest == entry.digest() => UpsertOutcome::Unchanged,
                Some(_) => {
                    Self::insert(&tx, entry)?;
                    UpsertOutcome::Replaced
                }
                None => {
                    // A full row supersedes the bare claim the cascade recorded,
                    // which is the only kind of row whose raw text is the desk code.
                    let promoted = tx.execute(
                        "DELETE FROM claims
                         WHERE target_date = ?1 AND resource = ?2 AND raw_row = resource",
                        params![date, resource],
                    )?;
                    Self::insert(&tx, entry)?;
                    if promoted > 0 {
                        UpsertOutcome::Replaced
                    } else {
                        UpsertOutcome::Inserted
                    }
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn latest_confirmed_on_or_after(&self, today: NaiveDate) -> Result<Option<NaiveDate>, LedgerError> {
        let db = self.lock()?;
        let latest: Option<String> = db.query_row(
            "SELECT MAX(target_date) FROM claims WHERE target_date >= ?1",
            params![today.to_string()],
            |row| row.get(0),
        )?;

        latest
            .map(|text| {
                text.parse::<NaiveDate>()
                    .map_err(|e| LedgerError::Corrupt(format!("target_date '{}': {}", text, e)))
            })
            .transpose()
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let sql = format!("SELECT {} FROM claims ORDER BY target_date DESC, resource", SELECT_COLUMNS);
        self.query_entries(&sql, &[])
    }

    fn entries_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<LedgerEntry>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM claims WHERE target_date BETWEEN ?1 AND ?2 ORDER BY target_date ASC, resource",
            SELECT_COLUMNS
        );
        let from = from.to_string();
        let to = to.to_string();
        self.query_entries(&sql, &[&from, &to])
    }

    fn count(&self) -> Result<usize, LedgerError> {
        let db = self.lock()?;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM claims", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn release(&self, resource: &Resource, date: NaiveDate) -> Result<usize, LedgerError> {
        let db = self.lock()?;
        let removed = db.execute(
            "DELETE FROM claims WHERE target_date = ?1 AND resource = ?2",
            params![date.to_string(), resource.as_str()],
        )?;
        log::debug!("Released {} ledger rows for {} on {}", removed, resource, date);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClaimRow, RowLayout};
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn stamp() -> NaiveDateTime {
        date(2024, 4, 30).and_hms_opt(9, 15, 0).unwrap()
    }

    fn bare(resource: &str, day: NaiveDate) -> LedgerEntry {
        LedgerEntry::confirmed(Resource::from(resource), day, stamp())
    }

    fn listed(resource: &str, day: &str, status: &str) -> LedgerEntry {
        let row = ClaimRow::new([resource, "Piso 17", "Torre A", "Staff", "", "", status, day]);
        RowLayout::default().parse(&row, stamp()).unwrap()
    }

    #[test]
    fn test_insert_then_identical_is_unchanged() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let entry = bare("P17-1001", date(2024, 5, 2));

        assert_eq!(ledger.upsert(&entry).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(ledger.upsert(&entry).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(ledger.count().unwrap(), 1);
        assert_eq!(ledger.entries().unwrap(), vec![entry]);
    }

    #[test]
    fn test_same_date_different_resources_coexist() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.upsert(&bare("P17-1001", date(2024, 5, 2))).unwrap();
        ledger.upsert(&bare("P17-1002", date(2024, 5, 2))).unwrap();
        assert_eq!(ledger.count().unwrap(), 2);
    }

    #[test]
    fn test_listed_row_promotes_bare_claim() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.upsert(&bare("P17-1001", date(2024, 5, 2))).unwrap();

        let full = listed("P17-1001", "02/05/2024", "Activa");
        assert_eq!(ledger.upsert(&full).unwrap(), UpsertOutcome::Replaced);
        assert_eq!(ledger.count().unwrap(), 1);
        assert_eq!(ledger.entries().unwrap()[0].field(2), "Piso 17");

        // A later bare claim does not downgrade the listed row.
        assert_eq!(
            ledger.upsert(&bare("P17-1001", date(2024, 5, 2))).unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(ledger.entries().unwrap()[0].field(2), "Piso 17");
    }

    #[test]
    fn test_changed_content_replaces() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.upsert(&listed("P17-1001", "02/05/2024", "Activa")).unwrap();
        let changed = listed("P17-1001", "02/05/2024", "Confirmada");

        assert_eq!(ledger.upsert(&changed).unwrap(), UpsertOutcome::Replaced);
        assert_eq!(ledger.count().unwrap(), 1);
        assert_eq!(ledger.entries().unwrap()[0].field(7), "Confirmada");
    }

    fn listed_blank(day: &str, status: &str) -> LedgerEntry {
        let row = ClaimRow::new(["P17-1001", "", "", status, "", "", "", day]);
        RowLayout::default().parse(&row, stamp()).unwrap()
    }

    #[test]
    fn test_listed_row_with_blank_key_cells_is_refreshed() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert_eq!(
            ledger.upsert(&listed_blank("02/05/2024", "Activa")).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            ledger.upsert(&listed_blank("02/05/2024", "Cancelada")).unwrap(),
            UpsertOutcome::Replaced
        );
        assert_eq!(ledger.count().unwrap(), 1);
        assert_eq!(ledger.entries().unwrap()[0].field(4), "Cancelada");
    }

    #[test]
    fn test_listed_row_with_blank_key_cells_promotes_bare_claim() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.upsert(&bare("P17-1001", date(2024, 5, 2))).unwrap();

        assert_eq!(
            ledger.upsert(&listed_blank("02/05/2024", "Activa")).unwrap(),
            UpsertOutcome::Replaced
        );
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_placeholder());
        assert_eq!(entries[0].field(4), "Activa");
    }

    #[test]
    fn test_other_listed_row_keeps_blank_key_row() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.upsert(&listed_blank("02/05/2024", "Activa")).unwrap();

        assert_eq!(
            ledger.upsert(&listed("P17-1001", "02/05/2024", "Activa")).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(ledger.count().unwrap(), 2);
    }

    #[test]
    fn test_release_drops_only_that_claim() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.upsert(&listed("P17-1001", "02/05/2024", "Activa")).unwrap();
        ledger.upsert(&bare("P17-1002", date(2024, 5, 2))).unwrap();
        ledger.upsert(&bare("P17-1001", date(2024, 5, 8))).unwrap();

        assert_eq!(ledger.release(&Resource::from("P17-1001"), date(2024, 5, 2)).unwrap(), 1);
        assert_eq!(ledger.release(&Resource::from("P17-1001"), date(2024, 5, 2)).unwrap(), 0);
        assert_eq!(ledger.count().unwrap(), 2);
        assert_eq!(
            ledger.latest_confirmed_on_or_after(date(2024, 5, 1)).unwrap(),
            Some(date(2024, 5, 8))
        );
    }

    #[test]
    fn test_latest_on_or_after() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert_eq!(ledger.latest_confirmed_on_or_after(date(2024, 5, 1)).unwrap(), None);

        ledger.upsert(&bare("P17-1001", date(2024, 4, 25))).unwrap();
        assert_eq!(ledger.latest_confirmed_on_or_after(date(2024, 5, 1)).unwrap(), None);

        ledger.upsert(&bare("P17-1001", date(2024, 5, 1))).unwrap();
        assert_eq!(
            ledger.latest_confirmed_on_or_after(date(2024, 5, 1)).unwrap(),
            Some(date(2024, 5, 1))
        );

        ledger.upsert(&bare("P17-1002", date(2024, 5, 9))).unwrap();
        ledger.upsert(&bare("P17-1001", date(2024, 5, 8))).unwrap();
        assert_eq!(
            ledger.latest_confirmed_on_or_after(date(2024, 5, 1)).unwrap(),
            Some(date(2024, 5, 9))
        );
    }

    #[test]
    fn test_latest_is_monotonic() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let today = date(2024, 5, 1);
        let mut previous = None;
        for day in [8, 2, 15, 3, 15, 9] {
            ledger.upsert(&bare("P17-1001", date(2024, 5, day))).unwrap();
            let latest = ledger.latest_confirmed_on_or_after(today).unwrap();
            assert!(latest >= previous);
            previous = latest;
        }
        assert_eq!(previous, Some(date(2024, 5, 15)));
    }

    #[test]
    fn test_ordering_is_by_calendar_not_text() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        // 02/06 sorts before 15/05 as DD/MM text; ISO storage must not.
        ledger.upsert(&listed("P17-1001", "15/05/2024", "Activa")).unwrap();
        ledger.upsert(&listed("P17-1001", "02/06/2024", "Activa")).unwrap();
        assert_eq!(
            ledger.latest_confirmed_on_or_after(date(2024, 5, 1)).unwrap(),
            Some(date(2024, 6, 2))
        );
    }

    #[test]
    fn test_entries_between() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        for day in [1, 8, 15, 22] {
            ledger.upsert(&bare("P17-1001", date(2024, 5, day))).unwrap();
        }
        let found = ledger.entries_between(date(2024, 5, 8), date(2024, 5, 15)).unwrap();
        let days: Vec<NaiveDate> = found.iter().map(|e| e.target_date).collect();
        assert_eq!(days, vec![date(2024, 5, 8), date(2024, 5, 15)]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("claims.db");
        {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger.upsert(&listed("P17-1003", "09/05/2024", "Activa")).unwrap();
        }
        let ledger = SqliteLedger::open(&path).unwrap();
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].resource.as_str(), "P17-1003");
        assert_eq!(entries[0].cells.len(), 8);
    }

    #[test]
    fn test_concurrent_upserts_of_same_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("claims.db");
        let ledger = std::sync::Arc::new(SqliteLedger::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.upsert(&bare("P17-1001", date(2024, 5, 2))).unwrap())
            })
            .collect();
        let outcomes: Vec<UpsertOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| **o == UpsertOutcome::Inserted).count(), 1);
        assert_eq!(ledger.count().unwrap(), 1);
    }
}
