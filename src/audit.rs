//! Audit log (`spec.md` §2 "audit events are emitted at each transition").
//! Grounded on the teacher's `chain_emitter.rs`: a bounded in-memory
//! ring buffer plus a broadcast channel for live subscribers, with a
//! rotating append-only file added for durability.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::warn;

/// One audit record. Serialized as a JSON line to the rotating file.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    FrameDecoded { dgn_name: String, instance: u8 },
    FrameDropped { reason: String },
    EntityStateEmitted { entity_id: String, channel: String },
    CommandReceived { entity_id: String },
    CommandValidated { entity_id: String },
    CommandRejected { entity_id: String, code: String, message: String },
    CommandTransmitted { entity_id: String, latency_ms: u64 },
    CommandTransmitFailed { entity_id: String, code: String, message: String },
}

#[derive(Serialize)]
struct AuditLine<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Owns the ring buffer, broadcast sender, and rotating file handle.
/// `emit` never blocks the caller on file I/O failures: a write error is
/// logged and swallowed, since a lost audit line must never abort a
/// transmission or decode in progress.
pub struct AuditLog {
    history: Mutex<VecDeque<AuditEvent>>,
    max_history: usize,
    tx: broadcast::Sender<AuditEvent>,
    file: tokio::sync::Mutex<Option<RotatingFile>>,
}

struct RotatingFile {
    path: std::path::PathBuf,
    max_bytes: u64,
    handle: File,
    written: u64,
}

impl RotatingFile {
    async fn open(path: &std::path::Path, max_bytes: u64) -> std::io::Result<Self> {
        let handle = OpenOptions::new().create(true).append(true).open(path).await?;
        let written = handle.metadata().await?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            handle,
            written,
        })
    }

    async fn write(&mut self, line: &str) -> std::io::Result<()> {
        if self.written + line.len() as u64 + 1 > self.max_bytes {
            self.rotate().await?;
        }
        self.handle.write_all(line.as_bytes()).await?;
        self.handle.write_all(b"\n").await?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    async fn rotate(&mut self) -> std::io::Result<()> {
        let rotated = self.path.with_extension("1");
        tokio::fs::rename(&self.path, &rotated).await.ok();
        self.handle = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        self.written = 0;
        Ok(())
    }
}

impl AuditLog {
    pub fn new(max_history: usize) -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            history: Mutex::new(VecDeque::with_capacity(max_history)),
            max_history,
            tx,
            file: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn with_file(max_history: usize, path: &std::path::Path, max_bytes: u64) -> std::io::Result<Self> {
        let log = Self::new(max_history);
        let rotating = RotatingFile::open(path, max_bytes).await?;
        *log.file.lock().await = Some(rotating);
        Ok(log)
    }

    pub async fn emit(&self, event: AuditEvent) {
        {
            let mut history = self.history.lock().expect("audit history mutex poisoned");
            if history.len() >= self.max_history {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let _ = self.tx.send(event.clone());

        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            let line = AuditLine { ts: Utc::now().to_rfc3339(), event: &event };
            match serde_json::to_string(&line) {
                Ok(json) => {
                    if let Err(e) = file.write(&json).await {
                        warn!(error = %e, "failed to write audit log line");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize audit event"),
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }

    pub fn history(&self) -> Vec<AuditEvent> {
        self.history.lock().expect("audit history mutex poisoned").iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_buffer_bounds_history() {
        let log = AuditLog::new(2);
        for i in 0..5 {
            log.emit(AuditEvent::CommandReceived { entity_id: format!("e{i}") }).await;
        }
        assert_eq!(log.history().len(), 2);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let log = AuditLog::new(10);
        let mut rx = log.subscribe();
        log.emit(AuditEvent::CommandReceived { entity_id: "e1".into() }).await;
        let event = rx.recv().await.unwrap();
        matches!(event, AuditEvent::CommandReceived { .. });
    }

    #[tokio::test]
    async fn file_backed_log_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::with_file(10, &path, 1_000_000).await.unwrap();
        log.emit(AuditEvent::CommandReceived { entity_id: "e1".into() }).await;
        // allow the async write to land before reading back
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("command_received"));
    }
}
