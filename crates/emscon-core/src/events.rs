use crate::connection::ConnectionStatus;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug)]
pub enum Event {
    StatusChanged {
        status: ConnectionStatus,
    },
    ConnectionLost {
        host: String,
        port: u16,
    },
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn listen(&self) -> EventListener {
        EventListener {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn send(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        self.send(Event::Notification {
            level,
            message: message.into(),
        });
    }
}

/// Receiver that skips over events lost to lagging instead of ending.
#[derive(Debug)]
pub struct EventListener {
    receiver: tokio::sync::broadcast::Receiver<Event>,
}

impl EventListener {
    /// `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged, dropped events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_survives_lagging() {
        let bus = EventBus::new(2);
        let mut listener = bus.listen();
        for n in 0..5 {
            bus.notify(NotificationLevel::Warning, format!("event {n}"));
        }

        let mut seen = Vec::new();
        for _ in 0..2 {
            match listener.next().await {
                Some(Event::Notification { message, .. }) => seen.push(message),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(seen, vec!["event 3", "event 4"]);

        bus.notify(NotificationLevel::Error, "after lag");
        assert!(matches!(
            listener.next().await,
            Some(Event::Notification { level: NotificationLevel::Error, .. })
        ));
    }

    #[tokio::test]
    async fn listener_ends_when_bus_is_dropped() {
        let bus = EventBus::new(4);
        let mut listener = bus.listen();
        bus.send(Event::StatusChanged {
            status: ConnectionStatus::Connected,
        });
        drop(bus);
        assert!(listener.next().await.is_some());
        assert!(listener.next().await.is_none());
    }
}
