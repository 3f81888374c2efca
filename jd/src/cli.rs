//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{JobStatus, Priority};

/// JobDaemon - priority job scheduler
#[derive(Parser)]
#[command(
    name = "jd",
    about = "Priority job scheduler with retries, timeouts and a durable queue",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler with the builtin processors until Ctrl-C
    Run {
        /// Exit once nothing is queued or running
        #[arg(long)]
        exit_when_idle: bool,

        /// Don't print events to stdout
        #[arg(short, long)]
        quiet: bool,
    },

    /// Queue a job
    Submit {
        /// Job type (selects the processor)
        #[arg(value_name = "TYPE")]
        job_type: String,

        /// Payload as JSON
        #[arg(value_name = "PAYLOAD", default_value = "null")]
        payload: String,

        /// critical, high, normal, low (or 0-3)
        #[arg(short, long)]
        priority: Option<Priority>,

        /// Automatic retries for retryable failures
        #[arg(short = 'r', long)]
        max_retries: Option<u32>,

        /// Per-attempt timeout
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        group: Option<String>,
    },

    /// Show queue counts and statistics
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List jobs
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<JobStatus>,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        group: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one job
    Show {
        /// Job id or unique prefix
        id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Cancel a queued or running job
    Cancel {
        /// Job id or unique prefix
        id: String,
    },

    /// Requeue a failed job with a fresh retry budget
    Retry {
        /// Job id or unique prefix
        id: String,
    },

    /// Drop finished jobs from history
    Purge {
        /// Only jobs that finished at least this long ago
        #[arg(long, default_value = "0")]
        older_than_secs: u64,
    },

    /// Show the event journal
    Events {
        /// Number of events to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use 'text' or 'json'", s)),
        }
    }
}

/// Where `jd` writes its log file
pub fn get_log_path() -> PathBuf {
    crate::config::data_dir().join("logs").join("jobdaemon.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from([
            "jd",
            "submit",
            "sleep",
            r#"{"ms": 100}"#,
            "--priority",
            "high",
            "--max-retries",
            "5",
            "--owner",
            "alice",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Submit {
                job_type,
                payload,
                priority,
                max_retries,
                owner,
                ..
            }) => {
                assert_eq!(job_type, "sleep");
                assert_eq!(payload, r#"{"ms": 100}"#);
                assert_eq!(priority, Some(Priority::High));
                assert_eq!(max_retries, Some(5));
                assert_eq!(owner.as_deref(), Some("alice"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_list_with_filters() {
        let cli = Cli::try_parse_from(["jd", "-l", "debug", "list", "--status", "failed", "-f", "json"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Some(Command::List { status, format, .. }) => {
                assert_eq!(status, Some(JobStatus::Failed));
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("table".parse::<OutputFormat>().is_err());
    }
}
