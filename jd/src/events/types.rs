//! Event types for job lifecycle streaming

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Job;

/// What happened to the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Added,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
    Retried,
    Purged,
}

impl JobEventKind {
    pub const ALL: [JobEventKind; 8] = [
        Self::Added,
        Self::Started,
        Self::Progress,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Retried,
        Self::Purged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retried => "retried",
            Self::Purged => "purged",
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown event kind: {}", s))
    }
}

/// A job state change, carrying a snapshot of the job after the change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: Job,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job: Job) -> Self {
        Self {
            kind,
            job,
            timestamp: Utc::now(),
        }
    }
}
