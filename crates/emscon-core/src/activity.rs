use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const ACTIVITY_CAPACITY: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub message: String,
}

/// Operator-facing record of what the console did, newest last. Every entry
/// is mirrored to `tracing`.
#[derive(Clone, Debug)]
pub struct ActivityLog {
    entries: Arc<Mutex<VecDeque<ActivityEntry>>>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY)
    }
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, level: ActivityLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            ActivityLevel::Debug => debug!(target: "emscon::activity", "{}", message),
            ActivityLevel::Info => info!(target: "emscon::activity", "{}", message),
            ActivityLevel::Warn => warn!(target: "emscon::activity", "{}", message),
            ActivityLevel::Error => error!(target: "emscon::activity", "{}", message),
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(ActivityEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(ActivityLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(ActivityLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(ActivityLevel::Error, message);
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let log = ActivityLog::with_capacity(3);
        for i in 0..5 {
            log.info(format!("entry {i}"));
        }
        let messages: Vec<String> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn clones_share_entries() {
        let log = ActivityLog::default();
        let other = log.clone();
        other.error("boom");
        assert_eq!(log.entries()[0].level, ActivityLevel::Error);
        log.clear();
        assert!(other.entries().is_empty());
    }
}
