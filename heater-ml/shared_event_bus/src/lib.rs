#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Stage events emitted by pipeline runs, and the sinks that receive them.
//!
//! Downstream packaging tooling follows a run through these events
//! (`pipeline.train.completed`, `pipeline.spec.failed`, ...) instead of
//! re-reading the report.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};

/// Event describing progress of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    /// Unique identifier (`evt-<uuid>`).
    pub id: String,
    /// Run the event belongs to.
    pub run_id: String,
    /// Component producing the event.
    pub source: String,
    /// Event type, e.g. `pipeline.export.completed`.
    pub event_type: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl StageEvent {
    /// Returns the stage segment of the event type (`export` for
    /// `pipeline.export.completed`).
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.event_type.split('.').nth(1)
    }
}

/// Event publisher interface.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event.
    async fn publish(&self, event: StageEvent) -> Result<()>;
}

/// Event subscriber interface.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Returns a receiver for events published after the call.
    async fn subscribe(&self) -> Result<broadcast::Receiver<StageEvent>>;
}

/// In-memory broadcast bus keeping a bounded backlog.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<StageEvent>,
    capacity: usize,
    backlog: Arc<Mutex<VecDeque<StageEvent>>>,
}

impl MemoryEventBus {
    /// Creates a new bus retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Snapshot of retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StageEvent> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained events of one type.
    #[must_use]
    pub fn of_type(&self, event_type: &str) -> Vec<StageEvent> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }
}

/// Publisher appending JSON lines to a file.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates a publisher for the given path, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: StageEvent) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            backlog.push_back(event.clone());
            while backlog.len() > self.capacity {
                backlog.pop_front();
            }
        }
        // No receivers is not an error for a local bus.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<StageEvent>> {
        Ok(self.sender.subscribe())
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: StageEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut data = serde_json::to_vec(&event)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    fn stage_event(event_type: &str) -> StageEvent {
        StageEvent {
            id: "evt-1".into(),
            run_id: "run-1".into(),
            source: "heater-learning".into(),
            event_type: event_type.into(),
            timestamp: "2026-01-05T00:00:00Z".into(),
            payload: serde_json::json!({ "rows": 60_000 }),
        }
    }

    #[test]
    fn publishes_and_receives() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(16);
            let mut rx = bus.subscribe().await.unwrap();
            bus.publish(stage_event("pipeline.load.completed"))
                .await
                .unwrap();
            let event = rx.recv().await.unwrap();
            assert_eq!(event.stage(), Some("load"));
        });
    }

    #[test]
    fn backlog_is_bounded() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(2);
            for stage in ["load", "train", "export"] {
                bus.publish(stage_event(&format!("pipeline.{stage}.completed")))
                    .await
                    .unwrap();
            }
            let kept: Vec<_> = bus
                .snapshot()
                .iter()
                .filter_map(|e| e.stage().map(str::to_owned))
                .collect();
            assert_eq!(kept, vec!["train", "export"]);
            assert_eq!(bus.of_type("pipeline.export.completed").len(), 1);
        });
    }

    #[test]
    fn file_publisher_appends_lines() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let publisher = FileEventPublisher::new(dir.path().join("events/run.jsonl")).unwrap();
            publisher
                .publish(stage_event("pipeline.load.completed"))
                .await
                .unwrap();
            publisher
                .publish(stage_event("pipeline.report.completed"))
                .await
                .unwrap();
            let content = std::fs::read_to_string(publisher.path()).unwrap();
            assert_eq!(content.lines().count(), 2);
            assert!(content.contains("pipeline.report.completed"));
        });
    }
}
