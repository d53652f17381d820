//! Configuration for hotdesk.
//!
//! A YAML file (see `global`) plus environment overrides, validated into
//! `RunSettings` before a run starts.

pub mod global;
pub mod overrides;
pub mod settings;

pub use global::{Config, LedgerConfig, ProberConfig, RawWeekday};
pub use settings::RunSettings;
