//! Validated run settings.
//!
//! Bad configuration values never abort a run: each one is reported as a
//! `ValidationError` and replaced by a default.

use std::time::Duration;

use crate::cascade::Timeouts;
use crate::domain::{Resource, WeekdaySet};
use crate::error::ValidationError;

use super::global::{Config, DEFAULT_HORIZON_DAYS, DEFAULT_RESOURCES, DEFAULT_WEEKDAYS};

const MIN_TIMEOUT_MS: u64 = 3_000;
const MAX_TIMEOUT_MS: u64 = 120_000;
const MAX_HORIZON_DAYS: u32 = 366;

/// Settings the coordinator runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Desks in preference order, deduplicated
    pub resources: Vec<Resource>,
    pub weekdays: WeekdaySet,
    pub horizon_days: u32,
    pub timeouts: Timeouts,
}

impl RunSettings {
    /// Validate `config`, returning usable settings and every value that was replaced.
    pub fn from_config(config: &Config) -> (Self, Vec<ValidationError>) {
        let mut problems = Vec::new();

        let mut resources: Vec<Resource> = Vec::new();
        for code in &config.resources {
            let code = code.trim();
            if !Resource::is_well_formed(code) {
                problems.push(ValidationError::InvalidResource(code.to_string()));
                continue;
            }
            let resource = Resource::from(code);
            if !resources.contains(&resource) {
                resources.push(resource);
            }
        }
        if resources.is_empty() {
            problems.push(ValidationError::NoResources);
            resources = DEFAULT_RESOURCES.iter().map(|c| Resource::from(*c)).collect();
        }

        let mut indices = Vec::new();
        for raw in &config.weekdays {
            let text = raw.as_text();
            match text.trim().parse::<u8>() {
                Ok(index) if index <= 6 => indices.push(index),
                _ => problems.push(ValidationError::InvalidWeekday(text)),
            }
        }
        let mut weekdays = WeekdaySet::from_indices(indices);
        if weekdays.is_empty() {
            problems.push(ValidationError::NoWeekdays);
            weekdays = WeekdaySet::from_indices(DEFAULT_WEEKDAYS);
        }

        let horizon_days = match config.horizon_days {
            0 => {
                problems.push(ValidationError::ZeroHorizon(DEFAULT_HORIZON_DAYS));
                DEFAULT_HORIZON_DAYS
            }
            days if days > MAX_HORIZON_DAYS => {
                problems.push(ValidationError::HorizonClamped {
                    value: days,
                    clamped: MAX_HORIZON_DAYS,
                });
                MAX_HORIZON_DAYS
            }
            days => days,
        };

        let prober = &config.prober;
        let timeouts = Timeouts {
            probe: clamp_timeout("probe_timeout_ms", prober.probe_timeout_ms, &mut problems),
            claim: clamp_timeout("claim_timeout_ms", prober.claim_timeout_ms, &mut problems),
            confirm: clamp_timeout("confirm_timeout_ms", prober.confirm_timeout_ms, &mut problems),
        };

        let settings = Self {
            resources,
            weekdays,
            horizon_days,
            timeouts,
        };
        (settings, problems)
    }

    /// Like `from_config`, logging each replaced value as a warning.
    pub fn validate(config: &Config) -> Self {
        let (settings, problems) = Self::from_config(config);
        for problem in &problems {
            log::warn!("config: {}", problem);
        }
        settings
    }
}

fn clamp_timeout(name: &'static str, value: u64, problems: &mut Vec<ValidationError>) -> Duration {
    let clamped = value.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
    if clamped != value {
        problems.push(ValidationError::TimeoutClamped { name, value, clamped });
    }
    Duration::from_millis(clamped)
}
