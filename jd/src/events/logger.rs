//! Event Logger - appends job events to a JSONL journal
//!
//! The journal is an audit trail for `jd events`; the durable store, not the
//! journal, is what state is restored from.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::JobEvent;

/// Writes every event it sees as one JSON line
pub struct EventLogger {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EventLogger {
    /// Open (or create) the journal for appending
    pub fn open(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "EventLogger::open: called");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_event(&mut self, event: &JobEvent) -> eyre::Result<()> {
        debug!(kind = %event.kind, job_id = %event.job.id, "EventLogger::write_event");
        let json = serde_json::to_string(event)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consume events until the bus closes or `shutdown` fires
    pub async fn run(mut self, mut rx: broadcast::Receiver<JobEvent>, shutdown: CancellationToken) {
        debug!(path = ?self.path, "EventLogger::run: starting event logger");
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(event) => {
                    if let Err(e) = self.write_event(&event) {
                        error!(job_id = %event.job.id, error = %e, "EventLogger: failed to write event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        // Drain whatever was already buffered before the shutdown signal
        while let Ok(event) = rx.try_recv() {
            if let Err(e) = self.write_event(&event) {
                error!(error = %e, "EventLogger: failed to write event during drain");
            }
        }
        let _ = self.writer.flush();
        debug!("EventLogger::run: stopped");
    }
}

/// Read a journal back, skipping lines that don't parse
pub fn read_journal(path: impl AsRef<Path>) -> eyre::Result<Vec<JobEvent>> {
    let path = path.as_ref();
    debug!(?path, "read_journal: reading journal");
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut events = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JobEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, "read_journal: failed to parse line"),
        }
    }
    debug!(count = events.len(), "read_journal: loaded events");
    Ok(events)
}

/// Spawn a journal logger subscribed to `bus`
pub fn spawn_event_logger(
    path: impl AsRef<Path>,
    bus: &EventBus,
    shutdown: CancellationToken,
) -> eyre::Result<tokio::task::JoinHandle<()>> {
    let logger = EventLogger::open(path)?;
    let rx = bus.subscribe();
    Ok(tokio::spawn(logger.run(rx, shutdown)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Job;
    use crate::events::JobEventKind;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_back() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("events.jsonl");
        let mut logger = EventLogger::open(&path).unwrap();

        let job = Job::new("echo", json!({"x": 1}));
        logger.write_event(&JobEvent::new(JobEventKind::Added, job.clone())).unwrap();
        logger.write_event(&JobEvent::new(JobEventKind::Completed, job.clone())).unwrap();

        let events = read_journal(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, JobEventKind::Added);
        assert_eq!(events[1].job.id, job.id);
    }

    #[test]
    fn test_read_skips_malformed_lines() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let good = serde_json::to_string(&JobEvent::new(JobEventKind::Added, Job::new("echo", json!(null)))).unwrap();
        fs::write(&path, format!("{}\nnot json\n\n{}\n{{\"kind\":", good, good)).unwrap();

        assert_eq!(read_journal(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_read_missing_journal() {
        let temp = tempdir().unwrap();
        assert!(read_journal(temp.path().join("absent.jsonl")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_logger_drains_on_shutdown() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let bus = EventBus::new(16);
        let shutdown = CancellationToken::new();
        let handle = spawn_event_logger(&path, &bus, shutdown.clone()).unwrap();

        let job = Job::new("echo", json!(null));
        bus.emit(JobEvent::new(JobEventKind::Added, job.clone()));
        bus.emit(JobEvent::new(JobEventKind::Started, job));
        shutdown.cancel();
        handle.await.unwrap();

        let kinds: Vec<JobEventKind> = read_journal(&path).unwrap().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![JobEventKind::Added, JobEventKind::Started]);
    }
}
