//! # Channel
//!
//! The bidirectional messaging handle shared by every bridge in a session.
//! Outbound traffic is a named event with a payload; inbound traffic is
//! dispatched to listeners registered under the event name.
//!
//! [`LocalChannel`] is the in-process implementation. Transports pump its
//! outbound broadcast onto a wire and feed wire frames back through
//! [`LocalChannel::deliver`]; tests drive both ends directly.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use super::message::Message;
use crate::{BridgeError, BridgeResult};

pub type ListenerId = u64;

/// Callback invoked with the payload of each inbound message on its event.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

#[cfg_attr(test, mockall::automock)]
pub trait Channel: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Sends a message without waiting for delivery.
    fn emit(&self, message: Message) -> BridgeResult<()>;

    /// Registers `listener` for inbound messages named `event`.
    fn on(&self, event: &str, listener: Listener) -> ListenerId;

    /// Deregisters a listener. Returns false if it was not registered.
    fn off(&self, event: &str, id: ListenerId) -> bool;

    fn listener_count(&self, event: &str) -> usize;
}

pub struct LocalChannel {
    listeners: DashMap<String, Vec<(ListenerId, Listener)>>,
    outbound: broadcast::Sender<Message>,
    connected: watch::Sender<bool>,
    next_listener_id: AtomicU64,
    /// Keeps the outbound channel open while no transport is attached.
    _internal_receiver: broadcast::Receiver<Message>,
}

impl LocalChannel {
    /// Creates a disconnected channel buffering up to `capacity` outbound
    /// messages. A zero capacity buffers one.
    pub fn new(capacity: usize) -> Self {
        let (outbound, receiver) = broadcast::channel(capacity.max(1));
        Self {
            listeners: DashMap::new(),
            outbound,
            connected: watch::Sender::new(false),
            next_listener_id: AtomicU64::new(1),
            _internal_receiver: receiver,
        }
    }

    /// Creates a channel that is already connected.
    pub fn connected(capacity: usize) -> Self {
        let channel = Self::new(capacity);
        channel.set_connected(true);
        channel
    }

    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.send_replace(connected);
        if previous != connected {
            debug!("Channel connected: {}", connected);
        }
    }

    /// Resolves once the channel is connected.
    pub async fn wait_connected(&self) -> BridgeResult<()> {
        let mut rx = self.connected.subscribe();
        rx.wait_for(|connected| *connected)
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        Ok(())
    }

    /// Receives every message emitted after the call.
    pub fn outbound(&self) -> broadcast::Receiver<Message> {
        self.outbound.subscribe()
    }

    /// Dispatches an inbound message to the listeners registered for its event
    /// and returns how many were invoked.
    ///
    /// Listeners are snapshotted before dispatch, so a listener may deregister
    /// itself (or others) from inside its callback.
    pub fn deliver(&self, message: &Message) -> usize {
        let snapshot: Vec<Listener> = match self.listeners.get(&message.event) {
            Some(entry) => entry.iter().map(|(_, l)| l.clone()).collect(),
            None => Vec::new(),
        };
        trace!(
            "Delivering {} to {} listener(s)",
            message.event,
            snapshot.len()
        );
        for listener in &snapshot {
            listener(&message.payload);
        }
        snapshot.len()
    }
}

impl Channel for LocalChannel {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn emit(&self, message: Message) -> BridgeResult<()> {
        if !self.is_connected() {
            return Err(BridgeError::Disconnected);
        }
        debug!("Emitting {}", message.event);
        self.outbound
            .send(message)
            .map_err(|e| BridgeError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn on(&self, event: &str, listener: Listener) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        trace!("Listener {} registered on {}", id, event);
        id
    }

    fn off(&self, event: &str, id: ListenerId) -> bool {
        let removed = match self.listeners.get_mut(event) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(listener_id, _)| *listener_id != id);
                before != entry.len()
            }
            None => false,
        };
        self.listeners.remove_if(event, |_, entry| entry.is_empty());
        if removed {
            trace!("Listener {} removed from {}", id, event);
        }
        removed
    }

    fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .get(event)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}
