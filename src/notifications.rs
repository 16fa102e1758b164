//! Unsolicited events pushed by the design service.
//!
//! Besides answering requests, the service reports progress as log lines
//! (`send-message`), user-facing notices (`send-notification`) and the result
//! of the session handshake (`is-connected`). A [`NotificationFeed`] keeps
//! persistent listeners on those events for as long as it lives.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, warn};

use crate::event::channel::{Channel, Listener, ListenerId};

pub const SEND_MESSAGE_EVENT: &str = "send-message";
pub const SEND_NOTIFICATION_EVENT: &str = "send-notification";
pub const IS_CONNECTED_EVENT: &str = "is-connected";

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationBody {
    /// A timestamped log line.
    Message(String),
    /// A notice with a severity such as `success` or `error`.
    Notice { severity: String, content: String },
    /// Handshake result.
    Connected(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub received_at: DateTime<Utc>,
    pub body: NotificationBody,
}

#[derive(Deserialize)]
struct NoticePayload {
    #[serde(rename = "crometypes", default)]
    severity: String,
    #[serde(default)]
    content: String,
}

fn parse(event: &str, payload: &Value) -> Option<NotificationBody> {
    match event {
        SEND_MESSAGE_EVENT => payload
            .as_str()
            .map(|text| NotificationBody::Message(text.to_string())),
        SEND_NOTIFICATION_EVENT => serde_json::from_value::<NoticePayload>(payload.clone())
            .ok()
            .map(|notice| NotificationBody::Notice {
                severity: notice.severity,
                content: notice.content,
            }),
        IS_CONNECTED_EVENT => payload.as_bool().map(NotificationBody::Connected),
        _ => None,
    }
}

pub struct NotificationFeed<C: Channel + 'static> {
    channel: Weak<C>,
    sender: broadcast::Sender<Notification>,
    listeners: Vec<(&'static str, ListenerId)>,
}

impl<C: Channel + 'static> NotificationFeed<C> {
    pub fn attach(channel: &Arc<C>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let listeners = [
            SEND_MESSAGE_EVENT,
            SEND_NOTIFICATION_EVENT,
            IS_CONNECTED_EVENT,
        ]
        .into_iter()
        .map(|event| {
            let sender = sender.clone();
            let listener: Listener = Arc::new(move |payload: &Value| match parse(event, payload) {
                Some(body) => {
                    debug!("Notification {}: {:?}", event, body);
                    let _ = sender.send(Notification {
                        received_at: Utc::now(),
                        body,
                    });
                }
                None => warn!("Unrecognized {} payload: {}", event, payload),
            });
            (event, channel.on(event, listener))
        })
        .collect();

        Self {
            channel: Arc::downgrade(channel),
            sender,
            listeners,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Notifications as a stream. Lagged notifications are skipped.
    pub fn stream(&self) -> impl Stream<Item = Notification> {
        BroadcastStream::new(self.subscribe()).filter_map(|item| item.ok())
    }

    pub fn detach(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            for (event, id) in self.listeners.drain(..) {
                channel.off(event, id);
            }
        }
        self.listeners.clear();
    }
}

impl<C: Channel + 'static> Drop for NotificationFeed<C> {
    fn drop(&mut self) {
        self.detach();
    }
}
