use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate};

use hotdesk::cascade::CancelToken;
use hotdesk::config::{Config, RunSettings};
use hotdesk::coordinator::RunCoordinator;
use hotdesk::ledger::{Ledger, SqliteLedger};
use hotdesk::prober::{AvailabilityProber, HttpProber, HttpProberConfig, ScriptedProber};
use hotdesk::report::{CancelSummary, ReconcileSummary, RunReport, RunStatus};

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hotdesk")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("hotdesk.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

type Coordinator = RunCoordinator<dyn AvailabilityProber, SqliteLedger>;

fn open_ledger(config: &Config) -> Result<Arc<SqliteLedger>> {
    let ledger = SqliteLedger::open(&config.ledger.path)
        .with_context(|| format!("Failed to open ledger at {}", config.ledger.path.display()))?;
    Ok(Arc::new(ledger))
}

fn build_prober(config: &Config, settings: &RunSettings, fixture: Option<&Path>) -> Result<Arc<dyn AvailabilityProber>> {
    if let Some(path) = fixture {
        println!("{} {}", "Replaying fixture:".yellow(), path.display());
        return Ok(Arc::new(ScriptedProber::load(path)?));
    }

    let token = std::env::var(&config.prober.token_env).ok();
    if token.is_none() {
        log::warn!("{} is not set, calling the booking system without a token", config.prober.token_env);
    }
    let timeout = settings.timeouts.probe.max(settings.timeouts.claim).max(settings.timeouts.confirm);
    let prober = HttpProber::new(HttpProberConfig {
        base_url: config.prober.base_url.clone(),
        token,
        timeout,
    })?;
    Ok(Arc::new(prober))
}

fn coordinator(config: &Config, settings: &RunSettings, prober: Arc<dyn AvailabilityProber>) -> Result<Coordinator> {
    let ledger = open_ledger(config)?;
    Ok(RunCoordinator::new(prober, ledger)
        .with_timeouts(settings.timeouts)
        .with_layout(config.rows.clone()))
}

fn format_dates(dates: &[NaiveDate]) -> String {
    if dates.is_empty() {
        return "-".to_string();
    }
    dates
        .iter()
        .map(|d| d.format("%a %Y-%m-%d").to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_sync(label: &str, summary: Option<&ReconcileSummary>) {
    match summary {
        Some(s) => println!(
            "{} {} rows: {} new, {} refreshed, {} unchanged, {} past, {} invalid, {} failed",
            label.cyan(),
            s.total(),
            s.inserted,
            s.replaced,
            s.unchanged,
            s.skipped_past,
            s.invalid,
            s.failed
        ),
        None => println!("{} {}", label.cyan(), "claims list unavailable".yellow()),
    }
}

fn print_report(report: &RunReport) {
    println!("{} {}", "Today:".cyan(), report.today);
    println!(
        "{} {}",
        "Floor:".cyan(),
        report.floor.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string())
    );
    print_sync("Initial sync:", report.initial_sync.as_ref());
    println!("{} {}", "Candidates:".cyan(), format_dates(&report.candidates));

    for breakdown in &report.per_resource {
        print!("  {} ", breakdown.resource.to_string().bold());
        if let Some(e) = &breakdown.probe_error {
            println!("{} {}", "listing failed:".red(), e);
            continue;
        }
        println!(
            "{} visible, {} tried: {} confirmed, {} taken, {} failed",
            breakdown.visible,
            breakdown.attempted(),
            breakdown.confirmed.len().to_string().green(),
            breakdown.conflicted.len(),
            breakdown.errored.len()
        );
        if let Some(e) = &breakdown.confirm_error {
            println!("    {} {}", "finalize failed:".red(), e);
        }
    }

    for (resource, date) in report.assignments() {
        println!("  {} {} {}", "claimed".green(), date.format("%a %Y-%m-%d"), resource);
    }

    for (resource, date) in report.ledger_gaps() {
        println!("{} {} on {} is held but not in the ledger", "Warning:".red(), resource, date);
    }

    if report.reconciliation.is_some() {
        print_sync("Reconciliation:", report.reconciliation.as_ref());
    }
    for (resource, date) in &report.recovered {
        println!("{} {} on {} was held despite a failed attempt", "Recovered:".green(), resource, date);
    }
    if report.cancelled {
        println!("{}", "Run cancelled before all desks were tried".yellow());
    }

    let verdict = match report.status() {
        RunStatus::Complete => format!("Claimed all {} dates", report.claimed_count()).green(),
        RunStatus::Partial => format!(
            "Claimed {} dates, still pending: {}",
            report.claimed_count(),
            format_dates(&report.pending)
        )
        .yellow(),
        RunStatus::NothingClaimed => format!("Nothing claimed, pending: {}", format_dates(&report.pending)).red(),
        RunStatus::NothingToDo => "Nothing to claim in the window".normal(),
    };
    println!("{}", verdict);
}

async fn handle_run(config: &Config, settings: &RunSettings, fixture: Option<&Path>) -> Result<()> {
    let prober = build_prober(config, settings, fixture)?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current desk");
            on_interrupt.cancel();
        }
    });

    let coordinator = coordinator(config, settings, prober)?.with_cancel(cancel);
    let report = coordinator
        .run_allocation(&settings.resources, &settings.weekdays, settings.horizon_days)
        .await
        .context("Run failed")?;

    print_report(&report);
    Ok(())
}

fn handle_plan(config: &Config, settings: &RunSettings) -> Result<()> {
    let ledger = open_ledger(config)?;
    let today = Local::now().date_naive();
    let floor = ledger.latest_confirmed_on_or_after(today)?;
    let candidates = hotdesk::planner::plan_candidates(
        floor,
        &settings.weekdays,
        hotdesk::planner::Horizon::Days(settings.horizon_days),
        today,
    )?;

    println!("{} {}", "Desks:".cyan(), settings.resources.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", "));
    println!("{} {}", "Weekdays:".cyan(), settings.weekdays);
    println!(
        "{} {}",
        "Floor:".cyan(),
        floor.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string())
    );
    println!("{} {}", "Candidates:".cyan(), format_dates(&candidates));
    Ok(())
}

async fn handle_claims(
    config: &Config,
    settings: &RunSettings,
    sync: bool,
    fixture: Option<&Path>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let ledger = open_ledger(config)?;

    if sync {
        let prober = build_prober(config, settings, fixture)?;
        let coordinator = RunCoordinator::new(prober, Arc::clone(&ledger))
            .with_timeouts(settings.timeouts)
            .with_layout(config.rows.clone());
        coordinator
            .establish_session()
            .await
            .context("Failed to reach the booking system")?;
        let summary = coordinator.sync_claims().await.context("Failed to import claims list")?;
        print_sync("Sync:", Some(&summary));
    }

    let mut entries = match (from, to) {
        (Some(from), Some(to)) => ledger.entries_between(from, to)?,
        _ => ledger
            .entries()?
            .into_iter()
            .filter(|e| from.is_none_or(|f| e.target_date >= f) && to.is_none_or(|t| e.target_date <= t))
            .collect(),
    };
    entries.sort_by_key(|e| e.target_date);

    if entries.is_empty() {
        println!("No claims recorded");
        return Ok(());
    }
    for entry in entries {
        let marker = if entry.is_placeholder() { "*".yellow() } else { " ".normal() };
        println!(
            "{}{}  {}  {}",
            marker,
            entry.target_date.format("%a %Y-%m-%d"),
            entry.resource.to_string().bold(),
            entry.queried_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn print_cancel(summary: &CancelSummary) {
    for (resource, date) in &summary.cancelled {
        println!("  {} {} {}", "cancelled".green(), date.format("%a %Y-%m-%d"), resource.to_string().bold());
    }
    for (resource, date, e) in &summary.failed {
        println!("  {} {} {}: {}", "failed".red(), date.format("%a %Y-%m-%d"), resource.to_string().bold(), e);
    }
    if summary.ledger_failed > 0 {
        println!(
            "{} {} cancelled claims are still in the ledger",
            "Warning:".red(),
            summary.ledger_failed
        );
    }
    println!(
        "{} {} cancelled, {} failed, {} ledger rows removed, {} past, {} invalid",
        "Cancel:".cyan(),
        summary.cancelled.len(),
        summary.failed.len(),
        summary.released,
        summary.skipped_past,
        summary.invalid
    );
}

async fn handle_cancel(
    config: &Config,
    settings: &RunSettings,
    fixture: Option<&Path>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let prober = build_prober(config, settings, fixture)?;
    let summary = coordinator(config, settings, prober)?
        .cancel_claims(from, to)
        .await
        .context("Cancel failed")?;

    if summary.cancelled.is_empty() && summary.failed.is_empty() {
        println!("No claims to cancel");
        return Ok(());
    }
    print_cancel(&summary);
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let settings = RunSettings::validate(config);

    match &cli.command {
        None => handle_run(config, &settings, None).await,
        Some(Commands::Run { fixture }) => handle_run(config, &settings, fixture.as_deref()).await,
        Some(Commands::Plan) => handle_plan(config, &settings),
        Some(Commands::Claims { sync, fixture, from, to }) => {
            handle_claims(config, &settings, *sync, fixture.as_deref(), *from, *to).await
        }
        Some(Commands::Cancel { fixture, from, to }) => {
            handle_cancel(config, &settings, fixture.as_deref(), *from, *to).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.is_verbose()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref())
        .context("Failed to load configuration")?
        .with_env_overrides();

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
