use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{debug, trace};

pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 4096;

/// Ordered transcript of engine activity (`card.open aspit/3`, ...). Keeps
/// the most recent `capacity` entries.
#[derive(Debug)]
pub struct EventLog {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_LOG_CAPACITY))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, event: impl Into<String>) {
        let event = event.into();
        debug!("event {event}");
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == self.capacity {
            if let Some(oldest) = entries.pop_front() {
                trace!("event log full; dropping {oldest}");
            }
        }
        entries.push_back(event);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|entry| entry.starts_with(prefix))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries())
            .context("serializing event log to JSON")?;
        fs::write(path, json)
            .with_context(|| format!("writing event log to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn event_log_writes_json_array() {
        let log = EventLog::new();
        log.record("card.open aspit/1");
        log.record(format!("hotspot.enter {} {}", 2, "door"));
        assert!(log.contains("hotspot.enter 2"));

        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");
        log.write_json(&path).unwrap();
        let parsed: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, vec!["card.open aspit/1", "hotspot.enter 2 door"]);
    }

    #[test]
    fn full_log_drops_oldest_entries() {
        let log = EventLog::with_capacity(2);
        log.record("card.open aspit/1");
        log.record("card.close aspit/1");
        log.record("card.open aspit/2");
        assert_eq!(log.entries(), vec!["card.close aspit/1", "card.open aspit/2"]);
        assert!(!log.contains("card.open aspit/1"));
    }
}
