//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: claim desks for the planned dates (default)
//! - plan: show the floor and candidate dates without claiming
//! - claims: show the ledger, optionally importing the booking system's list first
//! - cancel: give held claims back to the booking system

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hotdesk - claims office desks ahead of time, in preference order
#[derive(Parser, Debug)]
#[command(name = "hotdesk")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Claim desks for every planned date
    Run {
        /// Replay a YAML fixture instead of calling the booking system
        #[arg(short, long)]
        fixture: Option<PathBuf>,
    },

    /// Show the ledger floor and the dates the next run would try
    Plan,

    /// Show claims recorded in the ledger
    Claims {
        /// Import the booking system's claims list first
        #[arg(short, long)]
        sync: bool,

        /// Replay a YAML fixture when syncing
        #[arg(short, long, requires = "sync")]
        fixture: Option<PathBuf>,

        /// First date to show (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last date to show (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Cancel claims the booking system lists for today or later
    Cancel {
        /// Replay a YAML fixture instead of calling the booking system
        #[arg(short, long)]
        fixture: Option<PathBuf>,

        /// First date to cancel (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last date to cancel (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}
