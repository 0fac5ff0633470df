//! Launchpool - CLI entry point

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use launchpool::cli::{Cli, Command, OutputFormat, get_log_path};
use launchpool::collab::{CommandClientHost, CommandDialer, FileStager, read_phonebook};
use launchpool::config::Config;
use launchpool::domain::{Account, DelayPolicy, Identity, LaunchMode};
use launchpool::events::{create_event_bus, spawn_event_logger};
use launchpool::grouping::split_by_identity;
use launchpool::orchestrator::{Collaborators, LaunchOrchestrator, RunMetrics, RunReport};
use launchpool::store;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { mode, accounts } => cmd_run(config, mode, &accounts).await,
        Command::Groups => cmd_groups(&config),
        Command::Identities { import } => cmd_identities(&config, import.as_ref()),
        Command::Metrics { format } => cmd_metrics(&config, format),
    }
}

async fn cmd_run(mut config: Config, mode: Option<LaunchMode>, only: &[String]) -> Result<()> {
    debug!(?mode, ?only, "cmd_run: called");
    if let Some(mode) = mode {
        config.launch.mode = mode;
    }

    let mut all = store::load_accounts(&config.storage.accounts_file)?;
    // Each run starts from scratch; `done` only means done this run
    for account in &mut all {
        account.done = false;
    }
    let selected: Vec<Account> = all
        .iter()
        .filter(|a| only.is_empty() || only.contains(&a.name))
        .cloned()
        .collect();
    if selected.is_empty() {
        println!("{}", "No accounts to launch.".yellow());
        return Ok(());
    }

    let policy = Arc::new(DelayPolicy::from_config(&config.throttle));
    let records = store::load_identities(&config.storage.identities_file)?;
    let identities: Vec<Arc<Identity>> = records
        .iter()
        .map(|r| Arc::new(Identity::from_record(r, policy.clone())))
        .filter(|i| !i.is_synthetic())
        .collect();

    let collab = Collaborators {
        dialer: Arc::new(CommandDialer::new(&config.dialer)),
        stager: Arc::new(FileStager::new(&config.credentials)),
        host: Arc::new(CommandClientHost::new(&config.client)),
    };
    let bus = create_event_bus();
    let logger = spawn_event_logger(&bus, config.storage.metrics_dir.join("runs"));

    let accounts_file = config.storage.accounts_file.clone();
    let identities_file = config.storage.identities_file.clone();
    let orchestrator = LaunchOrchestrator::new(config, identities.clone(), collab, bus.clone());
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    println!(
        "{} {} accounts ({})",
        "Launching".bright_cyan().bold(),
        selected.len(),
        orchestrator.run_id().dimmed()
    );
    let shared: Vec<_> = selected.into_iter().map(Account::shared).collect();
    let report = orchestrator.run(&shared).await;

    drop(bus);
    if tokio::time::timeout(Duration::from_secs(5), logger).await.is_err() {
        warn!("Event logger did not shut down in time");
    }

    let mut updated: HashMap<String, Account> = HashMap::new();
    for account in &shared {
        let account = account.lock().await.clone();
        updated.insert(account.name.clone(), account);
    }
    for account in &mut all {
        if let Some(fresh) = updated.remove(&account.name) {
            *account = fresh;
        }
    }
    store::save_accounts(&accounts_file, &all)?;
    let records: Vec<_> = identities.iter().map(|i| i.to_record()).collect();
    store::save_identities(&identities_file, &records)?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    let status = if report.cancelled {
        "cancelled".yellow()
    } else {
        "finished".green()
    };
    println!("Run {} {}", report.run_id.dimmed(), status);
    println!("  {:10} {}", "completed".green(), report.completed.len());
    println!("  {:10} {}", "failed".red(), report.failed.len());
    println!("  {:10} {}", "skipped".dimmed(), report.skipped.len());
    for name in &report.failed {
        println!("    {} {}", "✗".red(), name);
    }
    if !report.retired.is_empty() {
        println!("  {} {}", "retired identities:".yellow(), report.retired.join(", "));
    }
    if let Some(path) = &report.metrics_path {
        println!("  metrics: {}", path.display());
    }
}

fn cmd_groups(config: &Config) -> Result<()> {
    debug!("cmd_groups: called");
    let accounts = store::load_accounts(&config.storage.accounts_file)?;
    let groups = split_by_identity(&accounts);
    if groups.is_empty() {
        println!("{}", "No identity groups.".dimmed());
    }
    for group in &groups {
        println!("{} ({})", group.id.bright_cyan().bold(), group.accounts.len());
        for account in &group.accounts {
            println!("  {}", account);
        }
    }
    let loose: Vec<&str> = accounts
        .iter()
        .filter(|a| a.identities.is_empty())
        .map(|a| a.name.as_str())
        .collect();
    if !loose.is_empty() {
        println!("{} ({})", "no identity".yellow(), loose.len());
        for account in loose {
            println!("  {}", account);
        }
    }
    Ok(())
}

fn cmd_identities(config: &Config, import: Option<&PathBuf>) -> Result<()> {
    debug!(?import, "cmd_identities: called");
    let path = &config.storage.identities_file;
    let mut records = store::load_identities(path)?;

    if let Some(phonebook) = import.or(config.dialer.phonebook.as_ref()) {
        let connections = read_phonebook(phonebook)?;
        let added = store::merge_connections(&mut records, &connections);
        if added > 0 {
            store::save_identities(path, &records)?;
        }
        println!("Imported {} new connection(s) from {}", added.to_string().green(), phonebook.display());
    }

    if records.is_empty() {
        println!("{}", "No identities configured.".dimmed());
    }
    for record in &records {
        let name = record.name.as_deref().unwrap_or(&record.connection);
        let last = match (&record.last_fail, &record.last_success) {
            (Some(fail), Some(ok)) if fail > ok => format!("failed {}", fail.format("%Y-%m-%d %H:%M")).red(),
            (Some(fail), None) => format!("failed {}", fail.format("%Y-%m-%d %H:%M")).red(),
            (_, Some(ok)) => format!("ok {}", ok.format("%Y-%m-%d %H:%M")).green(),
            (None, None) => "never used".dimmed(),
        };
        println!("{:16} {:24} {}", record.id.bright_cyan(), name, last);
    }
    Ok(())
}

fn cmd_metrics(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_metrics: called");
    let Some(metrics) = RunMetrics::load_latest(&config.storage.metrics_dir)? else {
        println!("{}", "No runs recorded yet.".dimmed());
        return Ok(());
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&metrics)?),
        OutputFormat::Text => {
            println!("{} {}", "Run".bright_cyan().bold(), metrics.run_id);
            println!("  mode:      {}", metrics.mode);
            println!("  started:   {}", metrics.started_at.format("%Y-%m-%d %H:%M:%S"));
            if let Some(finished) = metrics.finished_at {
                let secs = (finished - metrics.started_at).num_seconds();
                println!("  duration:  {}s", secs);
            }
            if metrics.cancelled {
                println!("  {}", "cancelled".yellow());
            }
            println!();
            for timeline in &metrics.accounts {
                let outcome = if timeline.outcome.is_success() {
                    "ok".green()
                } else {
                    "failed".red()
                };
                let entered = timeline
                    .entered_ms
                    .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                    .unwrap_or_else(|| "-".to_string());
                println!("  {:20} {:12} {:8} {}", timeline.account, timeline.identity, entered, outcome);
            }
            for identity in &metrics.identities {
                println!("  {} {} connection(s)", identity.id.bright_cyan(), identity.connections.len());
            }
        }
    }
    Ok(())
}
