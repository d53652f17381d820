//! Date window planning.
//!
//! Candidates start the day after the ledger floor (or today when nothing is
//! held) and run through `today + horizon_days`, keeping only configured
//! weekdays. Output is strictly increasing and never contains the floor.

use chrono::{Datelike, Days, NaiveDate};

use crate::domain::WeekdaySet;
use crate::error::{HotdeskError, Result};

/// Upper bound of the planning window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    /// Through `today + n` days, inclusive
    Days(u32),
    /// Through a fixed last date, inclusive (e.g. the last date a listing shows)
    Until(NaiveDate),
}

impl Horizon {
    fn last_date(&self, today: NaiveDate) -> Option<NaiveDate> {
        match *self {
            Horizon::Days(n) => today.checked_add_days(Days::new(u64::from(n))),
            Horizon::Until(date) => Some(date),
        }
    }
}

/// Compute the ordered candidate dates for a run.
///
/// Fails on an empty weekday set, which would otherwise be indistinguishable
/// from "everything is already booked".
pub fn plan_candidates(
    floor: Option<NaiveDate>,
    weekdays: &WeekdaySet,
    horizon: Horizon,
    today: NaiveDate,
) -> Result<Vec<NaiveDate>> {
    if weekdays.is_empty() {
        return Err(HotdeskError::Planning("weekday set is empty".to_string()));
    }

    let first = match floor.and_then(|f| f.succ_opt()) {
        Some(after_floor) => after_floor.max(today),
        None => today,
    };
    let Some(last) = horizon.last_date(today) else {
        return Err(HotdeskError::Planning(format!("horizon {:?} runs past the last representable date", horizon)));
    };

    let candidates: Vec<NaiveDate> = first
        .iter_days()
        .take_while(|day| *day <= last)
        .filter(|day| weekdays.contains(day.weekday()))
        .collect();

    tracing::debug!(
        floor = ?floor,
        first = %first,
        last = %last,
        weekdays = %weekdays,
        count = candidates.len(),
        "Planned candidate dates"
    );

    Ok(candidates)
}
