//! Environment overrides.
//!
//! Applied on top of the file configuration:
//! - `HOTDESK_RESOURCES`: comma-separated desk codes
//! - `HOTDESK_WEEKDAYS`: comma-separated weekday indices
//! - `HOTDESK_HORIZON_DAYS`: look-ahead window in days
//! - `HOTDESK_BASE_URL`: booking API base URL

use super::global::{Config, RawWeekday};

pub const RESOURCES_VAR: &str = "HOTDESK_RESOURCES";
pub const WEEKDAYS_VAR: &str = "HOTDESK_WEEKDAYS";
pub const HORIZON_VAR: &str = "HOTDESK_HORIZON_DAYS";
pub const BASE_URL_VAR: &str = "HOTDESK_BASE_URL";

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(RESOURCES_VAR) {
            log::debug!("{} overrides configured resources", RESOURCES_VAR);
            self.resources = split_list(&value);
        }

        if let Some(value) = lookup(WEEKDAYS_VAR) {
            log::debug!("{} overrides configured weekdays", WEEKDAYS_VAR);
            self.weekdays = split_list(&value).into_iter().map(RawWeekday::Text).collect();
        }

        if let Some(value) = lookup(HORIZON_VAR) {
            match value.trim().parse::<u32>() {
                Ok(days) => self.horizon_days = days,
                Err(_) => log::warn!("{}='{}' is not a number of days, ignored", HORIZON_VAR, value),
            }
        }

        if let Some(value) = lookup(BASE_URL_VAR) {
            self.prober.base_url = value;
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let config = Config::default().with_overrides_from(|_| None);
        assert_eq!(config.resources, Config::default().resources);
        assert_eq!(config.horizon_days, 28);
    }

    #[test]
    fn test_lists_are_split_and_trimmed() {
        let vars = env(&[(RESOURCES_VAR, " P17-2001 , ,P17-2002"), (WEEKDAYS_VAR, "0, 4")]);
        let config = Config::default().with_overrides_from(|k| vars.get(k).cloned());

        assert_eq!(config.resources, vec!["P17-2001", "P17-2002"]);
        assert_eq!(
            config.weekdays,
            vec![RawWeekday::Text("0".to_string()), RawWeekday::Text("4".to_string())]
        );
    }

    #[test]
    fn test_bad_horizon_is_ignored() {
        let vars = env(&[(HORIZON_VAR, "soon")]);
        let config = Config::default().with_overrides_from(|k| vars.get(k).cloned());
        assert_eq!(config.horizon_days, 28);

        let vars = env(&[(HORIZON_VAR, "10")]);
        let config = Config::default().with_overrides_from(|k| vars.get(k).cloned());
        assert_eq!(config.horizon_days, 10);
    }

    #[test]
    fn test_base_url_override() {
        let vars = env(&[(BASE_URL_VAR, "https://desks.example.com/api/")]);
        let config = Config::default().with_overrides_from(|k| vars.get(k).cloned());
        assert_eq!(config.prober.base_url, "https://desks.example.com/api/");
    }
}
