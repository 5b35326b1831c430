use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_HISTORY_ENTRIES: usize = 20;

/// Parameters for opening the remote session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// `user@host:port`
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    fn same_target(&self, entry: &ConnectionHistoryEntry) -> bool {
        entry.host == self.host && entry.port == self.port && entry.username == self.username
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHistoryEntry {
    pub id: String,
    pub display_name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ConnectionHistoryEntry {
    pub fn to_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(
            self.host.clone(),
            self.port,
            self.username.clone(),
            self.secret.clone(),
        )
    }
}

impl fmt::Debug for ConnectionHistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHistoryEntry")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("last_used_at", &self.last_used_at)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Most-recent-first list of previously used targets, one entry per
/// (host, port, username), never longer than [`MAX_HISTORY_ENTRIES`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionHistory {
    entries: Vec<ConnectionHistoryEntry>,
}

impl ConnectionHistory {
    pub fn from_entries(mut entries: Vec<ConnectionHistoryEntry>) -> Self {
        entries.truncate(MAX_HISTORY_ENTRIES);
        Self { entries }
    }

    pub fn entries(&self) -> &[ConnectionHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&ConnectionHistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Refreshes `last_used_at` of an existing entry for the same target in
    /// place, or inserts a new entry at the front. Returns the entry id.
    pub fn upsert(
        &mut self,
        config: &ConnectionConfig,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        if let Some(existing) = self.entries.iter_mut().find(|e| config.same_target(e)) {
            existing.last_used_at = now;
            return existing.id.clone();
        }

        let id = format!(
            "{}_{}_{}_{}",
            config.host,
            config.port,
            config.username,
            now.timestamp_millis()
        );
        self.entries.insert(
            0,
            ConnectionHistoryEntry {
                id: id.clone(),
                display_name: name.map(str::to_string).unwrap_or_else(|| config.label()),
                host: config.host.clone(),
                port: config.port,
                username: config.username.clone(),
                secret: config.secret.clone(),
                last_used_at: now,
                created_at: now,
            },
        );
        self.entries.truncate(MAX_HISTORY_ENTRIES);
        id
    }

    pub fn touch(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.last_used_at = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
