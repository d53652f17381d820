//! Resources, weekday filters, and the slots a prober exposes.

use std::fmt;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// A claimable desk, identified by its code (e.g. `P17-1001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(String);

impl Resource {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Desk codes look like `P17-1001`: at least six characters with a dash.
    pub fn is_well_formed(code: &str) -> bool {
        code.len() >= 6 && code.contains('-')
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Resource {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Weekday index used in configuration: 0 = Monday ... 6 = Sunday.
pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_monday() as u8
}

/// Set of weekdays on which desks should be claimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeekdaySet {
    mask: u8,
}

impl WeekdaySet {
    pub fn empty() -> Self {
        Self { mask: 0 }
    }

    /// Build from configuration indices, ignoring anything outside 0..=6.
    pub fn from_indices(indices: impl IntoIterator<Item = u8>) -> Self {
        let mut set = Self::empty();
        for index in indices {
            if index <= 6 {
                set.mask |= 1 << index;
            }
        }
        set
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.mask & (1 << weekday_index(day)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Indices in ascending order (Monday first).
    pub fn indices(&self) -> Vec<u8> {
        (0..7).filter(|i| self.mask & (1 << i) != 0).collect()
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
        let names: Vec<&str> = self.indices().into_iter().map(|i| NAMES[i as usize]).collect();
        write!(f, "{}", names.join(","))
    }
}

/// A (resource, date) pair as listed by the booking system in one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub resource: Resource,
    pub date: NaiveDate,
    pub visible: bool,
}

impl Slot {
    pub fn new(resource: Resource, date: NaiveDate, visible: bool) -> Self {
        Self { resource, date, visible }
    }
}
