//! JobDaemon - Priority Job Scheduler
//!
//! CLI entry point for running the scheduler and managing its queue.

use std::fs;
use std::time::Duration;

use clap::Parser;
use colored::{ColoredString, Colorize};
use eyre::{Context, Result};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use jobdaemon::cli::{Cli, Command, OutputFormat, get_log_path};
use jobdaemon::config::Config;
use jobdaemon::events::{JobEvent, JobEventKind, read_journal, spawn_event_logger};
use jobstore::OwnerLock;

use jobdaemon::{Job, JobFilter, JobId, JobStatus, Priority, ProcessorRegistry, Scheduler, SubmitOptions};

fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.to_uppercase().as_str() {
        "TRACE" => Some(tracing::Level::TRACE),
        "DEBUG" => Some(tracing::Level::DEBUG),
        "INFO" => Some(tracing::Level::INFO),
        "WARN" | "WARNING" => Some(tracing::Level::WARN),
        "ERROR" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => parse_level(s).unwrap_or_else(|| {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }),
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

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

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(store = %config.store.kind, max_concurrent = config.scheduler.max_concurrent, "JobDaemon loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run { exit_when_idle, quiet }) => {
            debug!(exit_when_idle, quiet, "main: matched Run command");
            cmd_run(&config, exit_when_idle, quiet).await
        }
        Some(Command::Submit {
            job_type,
            payload,
            priority,
            max_retries,
            timeout_ms,
            owner,
            group,
        }) => {
            debug!(%job_type, "main: matched Submit command");
            let options = SubmitOptions {
                priority,
                max_retries,
                timeout_ms,
                owner_id: owner,
                group_id: group,
            };
            cmd_submit(&config, &job_type, &payload, options).await
        }
        Some(Command::Status { format }) => {
            debug!(?format, "main: matched Status command");
            cmd_status(&config, format).await
        }
        Some(Command::List {
            status,
            owner,
            group,
            format,
        }) => {
            debug!(?status, "main: matched List command");
            let filter = JobFilter {
                owner_id: owner,
                group_id: group,
                status,
            };
            cmd_list(&config, &filter, format).await
        }
        Some(Command::Show { id, format }) => {
            debug!(%id, "main: matched Show command");
            cmd_show(&config, &id, format).await
        }
        Some(Command::Cancel { id }) => {
            debug!(%id, "main: matched Cancel command");
            cmd_cancel(&config, &id).await
        }
        Some(Command::Retry { id }) => {
            debug!(%id, "main: matched Retry command");
            cmd_retry(&config, &id).await
        }
        Some(Command::Purge { older_than_secs }) => {
            debug!(older_than_secs, "main: matched Purge command");
            cmd_purge(&config, older_than_secs).await
        }
        Some(Command::Events { lines, format }) => {
            debug!(lines, "main: matched Events command");
            cmd_events(&config, lines, format)
        }
        None => {
            debug!("main: no command, showing status");
            cmd_status(&config, OutputFormat::Text).await
        }
    }
}

/// Claim the configured store, then open a scheduler over it
///
/// The claim must outlive every write the scheduler makes.
fn open_owned_scheduler(config: &Config) -> Result<(Option<OwnerLock>, Scheduler)> {
    let owner = config.claim_store()?;
    Ok((owner, open_scheduler(config)?))
}

/// Scheduler over the configured store, with the builtin processors
///
/// Read-only; use `open_owned_scheduler` for anything that changes state.
fn open_scheduler(config: &Config) -> Result<Scheduler> {
    let store = config.open_store()?;
    Ok(Scheduler::new(
        config.scheduler.clone(),
        ProcessorRegistry::with_builtins(),
        store,
    ))
}

async fn resolve(scheduler: &Scheduler, reference: &str) -> Result<JobId> {
    scheduler
        .resolve_id(reference)
        .await
        .context(format!("Could not resolve job '{}'", reference))
}

async fn cmd_run(config: &Config, exit_when_idle: bool, quiet: bool) -> Result<()> {
    let (_owner, scheduler) = open_owned_scheduler(config)?;

    let journal_stop = CancellationToken::new();
    let journal = match &config.events.journal {
        Some(path) => Some(
            spawn_event_logger(path, scheduler.events(), journal_stop.clone())
                .context(format!("Failed to open event journal {}", path.display()))?,
        ),
        None => None,
    };

    let printer = (!quiet).then(|| {
        let mut events = scheduler.subscribe_to(&[]);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                println!("{}", format_event(&event));
            }
        })
    });

    let handle = scheduler.start()?;
    let status = scheduler.queue_status().await;
    println!(
        "{} {} queued, processors: {}",
        "Scheduler running:".green().bold(),
        status.queued,
        scheduler.processor_types().await.join(", ")
    );

    if exit_when_idle {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Ctrl-C received");
            }
            _ = wait_until_idle(&scheduler) => info!("Queue drained"),
        }
    } else {
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        info!("Ctrl-C received");
    }

    scheduler.shutdown().await;
    journal_stop.cancel();
    let journal = async {
        match journal {
            Some(handle) => handle.await,
            None => Ok(()),
        }
    };
    let (loop_result, journal_result) = futures::future::join(handle, journal).await;
    loop_result.context("Scheduler loop failed")?;
    if let Err(e) = journal_result {
        warn!(error = %e, "Event journal task failed");
    }
    if let Some(printer) = printer {
        printer.abort();
    }

    let stats = scheduler.stats().await;
    println!(
        "{} {} completed, {} failed, {} cancelled, {} retried",
        "Stopped:".bold(),
        stats.total_completed,
        stats.total_failed,
        stats.total_cancelled,
        stats.total_retried
    );
    Ok(())
}

async fn wait_until_idle(scheduler: &Scheduler) {
    while !scheduler.wait_idle(Duration::from_secs(60)).await {}
}

async fn cmd_submit(config: &Config, job_type: &str, payload: &str, options: SubmitOptions) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("Payload must be valid JSON")?;
    let (_owner, scheduler) = open_owned_scheduler(config)?;
    if !scheduler.processor_types().await.iter().any(|t| t == job_type) {
        println!(
            "{} no builtin processor for '{}'; it will fail unless a runner registers one",
            "Warning:".yellow(),
            job_type
        );
    }

    let job = scheduler.submit(job_type, payload, options).await;
    scheduler.persist_now().await.context("Failed to persist queue")?;
    let position = scheduler.queue_position(&job.id).await.unwrap_or(0);
    println!(
        "{} {} ({}, priority {}, position {})",
        "Queued".green(),
        job.id,
        job.job_type,
        job.priority,
        position
    );
    Ok(())
}

async fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    let scheduler = open_scheduler(config)?;
    let status = scheduler.queue_status().await;
    let stats = scheduler.stats().await;

    match format {
        OutputFormat::Json => {
            let value = json!({ "status": status, "stats": stats });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("{}", "Queue".bold());
            println!("  queued:    {}", status.queued);
            println!("  running:   {}", status.running);
            println!("  completed: {}", status.completed_count.to_string().green());
            println!("  failed:    {}", status.failed_count.to_string().red());
            println!("  cancelled: {}", status.cancelled_count.to_string().yellow());
            println!("{}", "Totals".bold());
            println!("  submitted: {}", stats.total_submitted);
            println!("  started:   {}", stats.total_started);
            println!("  retried:   {}", stats.total_retried);
            println!("  timed out: {}", stats.total_timed_out);
            if let Some(avg) = stats.avg_run_time_ms() {
                println!("  avg run:   {}ms", avg);
            }
            println!("  store:     {}", config.store.kind);
        }
    }
    Ok(())
}

async fn cmd_list(config: &Config, filter: &JobFilter, format: OutputFormat) -> Result<()> {
    let scheduler = open_scheduler(config)?;
    let jobs = scheduler.list_jobs(filter).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Text => {
            if jobs.is_empty() {
                println!("No jobs");
                return Ok(());
            }
            println!(
                "{:<10} {:<10} {:<9} {:<12} {:>4} {:>7}  {}",
                "ID", "STATUS", "PRIORITY", "TYPE", "PROG", "RETRIES", "CREATED"
            );
            for job in &jobs {
                println!(
                    "{:<10} {} {} {:<12} {:>3}% {:>7}  {}",
                    job.id.short(),
                    colored_status(job.status),
                    colored_priority(job.priority),
                    job.job_type,
                    job.progress,
                    format!("{}/{}", job.retry_count, job.max_retries),
                    format_ms(job.created_at)
                );
            }
        }
    }
    Ok(())
}

async fn cmd_show(config: &Config, reference: &str, format: OutputFormat) -> Result<()> {
    let scheduler = open_scheduler(config)?;
    let id = resolve(&scheduler, reference).await?;
    let job = scheduler
        .get_job(&id)
        .await
        .ok_or_else(|| eyre::eyre!("Job {} disappeared", id))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
        OutputFormat::Text => print_job(&job),
    }
    Ok(())
}

fn print_job(job: &Job) {
    println!("{} {}", "Job".bold(), job.id);
    println!("  type:      {}", job.job_type);
    println!("  status:    {}", colored_status(job.status));
    println!("  priority:  {}", colored_priority(job.priority));
    println!("  progress:  {}%", job.progress);
    println!("  retries:   {}/{}", job.retry_count, job.max_retries);
    println!("  timeout:   {}ms", job.timeout_ms);
    if let Some(owner) = &job.owner_id {
        println!("  owner:     {}", owner);
    }
    if let Some(group) = &job.group_id {
        println!("  group:     {}", group);
    }
    println!("  created:   {}", format_ms(job.created_at));
    if let Some(started) = job.started_at {
        println!("  started:   {}", format_ms(started));
    }
    if let Some(done) = job.completed_at {
        println!("  finished:  {}", format_ms(done));
    }
    println!("  payload:   {}", job.payload);
    if let Some(result) = &job.result {
        println!("  result:    {}", result.to_string().green());
    }
    if let Some(error) = &job.error {
        println!("  error:     {}", error.to_string().red());
    }
    if !job.log.is_empty() {
        println!("{}", "Log".bold());
        for entry in &job.log {
            println!("  {} [{}] {}", format_ms(entry.timestamp), entry.level, entry.message);
        }
    }
}

async fn cmd_cancel(config: &Config, reference: &str) -> Result<()> {
    let (_owner, scheduler) = open_owned_scheduler(config)?;
    let id = resolve(&scheduler, reference).await?;
    let job = scheduler.cancel(&id).await?;
    println!("{} {} ({})", "Cancelled".yellow(), job.id, job.job_type);
    Ok(())
}

async fn cmd_retry(config: &Config, reference: &str) -> Result<()> {
    let (_owner, scheduler) = open_owned_scheduler(config)?;
    let id = resolve(&scheduler, reference).await?;
    let job = scheduler.retry(&id).await?;
    println!("{} {} ({})", "Requeued".green(), job.id, job.job_type);
    Ok(())
}

async fn cmd_purge(config: &Config, older_than_secs: u64) -> Result<()> {
    let (_owner, scheduler) = open_owned_scheduler(config)?;
    let purged = scheduler.purge_history(Duration::from_secs(older_than_secs)).await;
    println!("Purged {} finished job(s)", purged);
    Ok(())
}

fn cmd_events(config: &Config, lines: usize, format: OutputFormat) -> Result<()> {
    let path = config
        .events
        .journal
        .as_ref()
        .ok_or_else(|| eyre::eyre!("No event journal configured; set events.journal in the config file"))?;
    let events = read_journal(&path).context(format!("Failed to read journal {}", path.display()))?;
    let tail = &events[events.len().saturating_sub(lines)..];

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(tail)?),
        OutputFormat::Text => {
            if tail.is_empty() {
                println!("No events in {}", path.display());
            }
            for event in tail {
                println!("{}", format_event(event));
            }
        }
    }
    Ok(())
}

fn format_event(event: &JobEvent) -> String {
    let kind = format!("{:<9}", event.kind.as_str());
    let kind = match event.kind {
        JobEventKind::Completed => kind.green(),
        JobEventKind::Failed => kind.red(),
        JobEventKind::Cancelled | JobEventKind::Retried => kind.yellow(),
        JobEventKind::Started => kind.cyan(),
        JobEventKind::Added => kind.blue(),
        JobEventKind::Progress | JobEventKind::Purged => kind.dimmed(),
    };
    let job = &event.job;
    let detail = match event.kind {
        JobEventKind::Progress => format!("{}%", job.progress),
        JobEventKind::Failed => job.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
        JobEventKind::Retried => format!("retry {}/{}", job.retry_count, job.max_retries),
        JobEventKind::Completed => job.result.as_ref().map(|r| r.to_string()).unwrap_or_default(),
        _ => String::new(),
    };
    format!(
        "{} {} {} {:<12} {}",
        event.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S%.3f"),
        kind,
        job.id.short(),
        job.job_type,
        detail
    )
}

fn colored_status(status: JobStatus) -> ColoredString {
    let text = format!("{:<10}", status.to_string());
    match status {
        JobStatus::Queued => text.normal(),
        JobStatus::Running => text.cyan(),
        JobStatus::Complete => text.green(),
        JobStatus::Failed => text.red(),
        JobStatus::Cancelled => text.yellow(),
    }
}

fn colored_priority(priority: Priority) -> ColoredString {
    let text = format!("{:<9}", priority.to_string());
    match priority {
        Priority::Critical => text.red().bold(),
        Priority::High => text.yellow(),
        Priority::Normal => text.normal(),
        Priority::Low => text.dimmed(),
    }
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
