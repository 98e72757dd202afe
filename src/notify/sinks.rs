//! Notifier implementations

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::errors::{NotifyError, NotifyResult};
use super::event::{AlertSeverity, EventKind, LifecycleEvent};
use super::Notifier;
use crate::observability::{Logger, Severity};

/// Writes each event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, event: &LifecycleEvent) -> NotifyResult<()> {
        let severity = match event.severity {
            AlertSeverity::Info => Severity::Info,
            AlertSeverity::Warning => Severity::Warn,
            AlertSeverity::Critical => Severity::Error,
        };
        let episode = event.episode_id.map(|id| id.to_string()).unwrap_or_default();
        let id = event.id.to_string();

        let mut fields: Vec<(&str, &str)> = vec![
            ("alert_id", id.as_str()),
            ("alert_severity", event.severity.as_str()),
            ("message", event.message.as_str()),
        ];
        if !episode.is_empty() {
            fields.push(("episode_id", episode.as_str()));
        }
        for (key, value) in &event.fields {
            fields.push((key.as_str(), value.as_str()));
        }

        Logger::log(severity, &format!("ALERT_{}", event.kind.as_str()), &fields);
        Ok(())
    }
}

/// Appends one JSON line per event, synced before returning.
pub struct FileNotifier {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileNotifier {
    /// Open or create the alert file.
    pub fn open(path: impl AsRef<Path>) -> NotifyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    async fn publish(&self, event: &LifecycleEvent) -> NotifyResult<()> {
        let line = event.to_json();
        let mut writer = self.writer.lock().map_err(|_| NotifyError::Rejected {
            sink: self.path.display().to_string(),
            reason: "writer lock poisoned".into(),
        })?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
    fail: Arc<Mutex<bool>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of events of one kind.
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| e.kind == kind).count())
            .unwrap_or(0)
    }

    /// Kinds in publication order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events
            .lock()
            .map(|events| events.iter().map(|e| e.kind).collect())
            .unwrap_or_default()
    }

    /// Make subsequent publishes fail (events are still not recorded).
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut fail) = self.fail.lock() {
            *fail = failing;
        }
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(&self, event: &LifecycleEvent) -> NotifyResult<()> {
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(NotifyError::Rejected {
                sink: "memory".into(),
                reason: "sink unavailable".into(),
            });
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

/// Delivers to every inner notifier; one failing sink does not stop the rest.
#[derive(Default, Clone)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn publish(&self, event: &LifecycleEvent) -> NotifyResult<()> {
        let mut failed = 0;
        for sink in &self.sinks {
            if sink.publish(event).await.is_err() {
                failed += 1;
            }
        }

        if failed == 0 {
            Ok(())
        } else {
            Err(NotifyError::Partial {
                failed,
                total: self.sinks.len(),
            })
        }
    }
}
