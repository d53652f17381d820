//! File configuration.
//!
//! Loaded from an explicit path, ./.hotdesk.yml, or ~/.config/hotdesk/hotdesk.yml.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::RowLayout;

/// Default desks, most preferred first.
pub const DEFAULT_RESOURCES: [&str; 3] = ["P17-1001", "P17-1002", "P17-1003"];

/// Default weekdays: Wednesday and Thursday.
pub const DEFAULT_WEEKDAYS: [u8; 2] = [2, 3];

/// Default look-ahead window.
pub const DEFAULT_HORIZON_DAYS: u32 = 28;

/// A weekday entry as written in YAML; numbers and strings are both accepted
/// so bad entries can be reported instead of failing the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawWeekday {
    Index(i64),
    Text(String),
}

impl RawWeekday {
    pub fn as_text(&self) -> String {
        match self {
            RawWeekday::Index(i) => i.to_string(),
            RawWeekday::Text(s) => s.clone(),
        }
    }
}

/// Top-level configuration for hotdesk.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Desk codes in preference order.
    pub resources: Vec<String>,

    /// Weekdays to claim (0 = Monday ... 6 = Sunday).
    pub weekdays: Vec<RawWeekday>,

    /// Days ahead of today to plan for, inclusive.
    pub horizon_days: u32,

    /// Ledger settings.
    pub ledger: LedgerConfig,

    /// Booking system connection settings.
    pub prober: ProberConfig,

    /// Layout of rows in the booking system's claims listing.
    pub rows: RowLayout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resources: DEFAULT_RESOURCES.iter().map(|s| s.to_string()).collect(),
            weekdays: DEFAULT_WEEKDAYS.iter().map(|d| RawWeekday::Index(i64::from(*d))).collect(),
            horizon_days: DEFAULT_HORIZON_DAYS,
            ledger: LedgerConfig::default(),
            prober: ProberConfig::default(),
            rows: RowLayout::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .hotdesk.yml in current directory
    /// 3. ~/.config/hotdesk/hotdesk.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".hotdesk.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .hotdesk.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .hotdesk.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("hotdesk").join("hotdesk.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

/// Ledger settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("hotdesk")
                .join("claims.db"),
        }
    }
}

/// Booking system connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProberConfig {
    /// Base URL of the booking API.
    pub base_url: String,

    /// Environment variable holding the bearer token.
    pub token_env: String,

    /// Session check and listings, in milliseconds.
    pub probe_timeout_ms: u64,

    /// A single claim attempt, in milliseconds.
    pub claim_timeout_ms: u64,

    /// Finalizing a desk's claims, in milliseconds.
    pub confirm_timeout_ms: u64,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/".to_string(),
            token_env: "HOTDESK_TOKEN".to_string(),
            probe_timeout_ms: 90_000,
            claim_timeout_ms: 30_000,
            confirm_timeout_ms: 120_000,
        }
    }
}
