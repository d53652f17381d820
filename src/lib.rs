//! Hotdesk - claims office desks ahead of time.
//!
//! Each run plans the configured weekdays past the latest date already held,
//! then walks the desks in preference order claiming whatever each one still
//! has free. A SQLite ledger records every confirmed claim so the next run
//! starts where this one stopped.

pub mod cascade;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod planner;
pub mod prober;
pub mod report;

pub use error::{HotdeskError, Result};
