//! The notification channel
//!
//! A push-only TCP stream.  On connect the server sends a nonce; a command
//! channel client ties itself to the notification channel by quoting that
//! nonce in an NTIE command.  Tied channels then receive one line per event
//! delta.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::api::auth;
use crate::models::events::{Event, EventState};

/// One event delta, as sent to tied channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event_id: u32,
    pub change_type: String,
    pub value: String,
}

impl Notification {
    fn line(&self) -> String {
        format!("{} {} {}", self.event_id, self.change_type, self.value)
    }
}

struct Channel {
    sender: mpsc::UnboundedSender<String>,
    tied: AtomicBool,
}

/// All connected notification channels, keyed by nonce
#[derive(Default)]
pub struct NotificationRegistry {
    channels: DashMap<String, Arc<Channel>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new channel and returns its nonce
    pub fn register(&self, sender: mpsc::UnboundedSender<String>) -> String {
        let nonce = auth::get_challenge();
        self.channels.insert(
            nonce.clone(),
            Arc::new(Channel {
                sender,
                tied: AtomicBool::new(false),
            }),
        );
        nonce
    }

    fn unregister(&self, nonce: &str) {
        self.channels.remove(nonce);
    }

    /// Ties a command session to the channel carrying this nonce
    pub fn tie(&self, nonce: &str) -> bool {
        match self.channels.get(nonce) {
            Some(channel) => {
                channel.tied.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Sends a batch of notifications to every tied channel
    pub fn send_notifications(&self, notifications: &[Notification]) {
        if notifications.is_empty() {
            return;
        }
        let tied: Vec<Arc<Channel>> = self
            .channels
            .iter()
            .filter(|entry| entry.tied.load(Ordering::SeqCst))
            .map(|entry| entry.value().clone())
            .collect();
        debug!(
            "sending {} notifications to {} tied channels",
            notifications.len(),
            tied.len()
        );
        for notification in notifications {
            let line = notification.line();
            for channel in &tied {
                let _ = channel.sender.send(line.clone());
            }
        }
    }

    /// Builds the notification batch for one event commit
    pub fn build_notifications(
        new_event: &Event,
        old_event: Option<&Event>,
        changed: &[&'static str],
    ) -> Vec<Notification> {
        let id = match new_event.id {
            Some(id) => id,
            None => return Vec::new(),
        };

        // A brand new event only reports its arrival from the embryonic
        // state
        let old_event = match old_event {
            Some(old_event) => old_event,
            None => {
                return vec![Notification {
                    event_id: id,
                    change_type: "state".to_string(),
                    value: format!("{} {}", EventState::Embryonic, new_event.state),
                }]
            }
        };

        let mut notifications = Vec::new();
        for &attr in changed {
            match attr {
                "state" => notifications.push(Notification {
                    event_id: id,
                    change_type: "state".to_string(),
                    value: format!("{} {}", old_event.state, new_event.state),
                }),
                "log" | "history" => notifications.push(Notification {
                    event_id: id,
                    change_type: attr.to_string(),
                    value: "1".to_string(),
                }),
                other => notifications.push(Notification {
                    event_id: id,
                    change_type: "attr".to_string(),
                    value: other.to_string(),
                }),
            }
        }
        notifications
    }
}

/// Accept loop for the notification port
pub async fn serve(listener: TcpListener, registry: Arc<NotificationRegistry>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                debug!("notification accept failed: {}", error);
                continue;
            }
        };
        debug!("new notification channel from {}", peer);
        let registry = registry.clone();
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let nonce = registry.register(tx);
            let mut stream = stream;
            if stream
                .write_all(format!("{}\r\n", nonce).as_bytes())
                .await
                .is_err()
            {
                registry.unregister(&nonce);
                return;
            }
            while let Some(line) = rx.recv().await {
                if stream
                    .write_all(format!("{}\r\n", line).as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
            info!("lost notification channel from {}", peer);
            registry.unregister(&nonce);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::events::{EventKind, SubIndex};

    fn open_event(id: u32) -> Event {
        let mut event = Event::new("example-gw", SubIndex::Interface(1), EventKind::PortState);
        event.set_state(EventState::Open, "monitor").unwrap();
        event.id = Some(id);
        event
    }

    #[test]
    fn new_events_notify_the_embryonic_transition() {
        let event = open_event(7);
        let notifications =
            NotificationRegistry::build_notifications(&event, None, &["state", "history"]);
        assert_eq!(
            notifications,
            vec![Notification {
                event_id: 7,
                change_type: "state".to_string(),
                value: "embryonic open".to_string(),
            }]
        );
    }

    #[test]
    fn changed_fields_map_to_notification_kinds() {
        let old_event = open_event(9);
        let mut new_event = old_event.clone();
        new_event.set_state(EventState::Working, "operator").unwrap();
        new_event.add_log("working on it");

        let notifications = NotificationRegistry::build_notifications(
            &new_event,
            Some(&old_event),
            &["state", "log", "history", "portstate"],
        );
        let lines: Vec<String> = notifications.iter().map(Notification::line).collect();
        assert_eq!(
            lines,
            vec![
                "9 state open working",
                "9 log 1",
                "9 history 1",
                "9 attr portstate",
            ]
        );
    }

    #[test]
    fn untied_channels_get_nothing() {
        let registry = NotificationRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let nonce = registry.register(tx);

        registry.send_notifications(&[Notification {
            event_id: 1,
            change_type: "state".to_string(),
            value: "open working".to_string(),
        }]);
        assert!(rx.try_recv().is_err());

        assert!(registry.tie(&nonce));
        registry.send_notifications(&[Notification {
            event_id: 1,
            change_type: "log".to_string(),
            value: "1".to_string(),
        }]);
        assert_eq!(rx.try_recv().unwrap(), "1 log 1");
    }

    #[test]
    fn tying_an_unknown_nonce_fails() {
        let registry = NotificationRegistry::new();
        assert!(!registry.tie("deadbeef"));
    }
}
