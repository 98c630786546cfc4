//! Event subscribers

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::errors::BusError;
use crate::model::{Event, EventStatus};

/// Observer of execution events.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Handle one event. Errors are logged by the dispatcher and never stop
    /// delivery to the remaining subscribers.
    async fn on_event(&self, event: &Event) -> Result<(), BusError>;

    /// Release resources held by the subscriber; called on bus shutdown.
    fn close(&self) -> Result<(), BusError> {
        Ok(())
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSubscriber;

#[async_trait]
impl EventSubscriber for TracingSubscriber {
    async fn on_event(&self, event: &Event) -> Result<(), BusError> {
        match event.status {
            EventStatus::Fail | EventStatus::Error => warn!(
                entity = %event.entity_type,
                id = %event.entity_id,
                status = %event.status,
                elapsed = ?event.elapsed,
                "{}: {}",
                event.name,
                event.message
            ),
            _ => info!(
                entity = %event.entity_type,
                id = %event.entity_id,
                status = %event.status,
                elapsed = ?event.elapsed,
                "{}",
                event.name
            ),
        }
        Ok(())
    }
}

/// Keeps every delivered event in memory, in delivery order.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Status sequence observed for one entity.
    pub fn statuses_for(&self, entity_id: &str) -> Vec<EventStatus> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.entity_id == entity_id)
            .map(|event| event.status)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventSubscriber for EventRecorder {
    async fn on_event(&self, event: &Event) -> Result<(), BusError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Appends events as JSON lines to a file.
#[derive(Debug)]
pub struct JsonLinesSubscriber {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonLinesSubscriber {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSubscriber for JsonLinesSubscriber {
    async fn on_event(&self, event: &Event) -> Result<(), BusError> {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return Err(BusError::Closed("json lines sink"));
        };
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn close(&self) -> Result<(), BusError> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;

    #[tokio::test]
    async fn recorder_tracks_statuses_per_entity() {
        let recorder = EventRecorder::new();
        for status in [EventStatus::Running, EventStatus::Pass] {
            let event = Event::new(EntityType::Keyword, "k1", "Sleep", status);
            recorder.on_event(&event).await.unwrap();
        }
        let other = Event::new(EntityType::Module, "m1", "Setup", EventStatus::Running);
        recorder.on_event(&other).await.unwrap();

        assert_eq!(
            recorder.statuses_for("k1"),
            vec![EventStatus::Running, EventStatus::Pass]
        );
        assert_eq!(recorder.len(), 3);
    }

    #[tokio::test]
    async fn json_lines_flushes_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("events.jsonl");
        let sink = JsonLinesSubscriber::create(&path).unwrap();

        let event = Event::new(EntityType::TestCase, "tc", "Login", EventStatus::Pass);
        sink.on_event(&event).await.unwrap();
        sink.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let line = content.lines().next().unwrap();
        let parsed: Event = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.entity_id, "tc");

        assert!(sink.on_event(&event).await.is_err());
    }
}
