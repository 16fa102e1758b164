//! # Request/Response Bridge
//!
//! A bridge turns one trigger activation into exactly one outbound request and
//! arms exactly one listener for the matching response event. When the
//! response arrives the listener removes itself and hands the payload to the
//! caller.
//!
//! ## Listener lifecycle
//!
//! ```text
//! arm ──▶ emit request ──▶ on(response event) ──▶ reset trigger
//!                                 │
//!          ┌──────────────┬───────┴──────┬──────────────┐
//!          ▼              ▼              ▼              ▼
//!      response        timeout        re-arm      dispose / drop
//!      Ok(resp)     Err(Timeout)  Err(Superseded)  Err(Cancelled)
//! ```
//!
//! Every path deregisters the listener and completes the caller's callback
//! exactly once. A bridge holds at most one armed listener.
//!
//! ## Silent drops
//!
//! A disconnected channel, an unset trigger or an empty `name` sends nothing
//! and arms nothing. [`Bridge::arm`] reports these as
//! [`ArmOutcome::Dropped`] and on the diagnostics channel rather than as
//! errors. [`Bridge::request`] turns them into [`BridgeError::Dropped`].
//!
//! ## Correlation
//!
//! With `correlation` enabled each request carries a `request_id` field and
//! only responses echoing it are accepted. Without it responses are matched
//! by event name alone, which is what the existing design service expects.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};

use serde_json::Value;
use thiserror::Error;
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tracing::{instrument, trace};
use uuid::Uuid;

use super::{
    channel::{Channel, Listener, ListenerId},
    diagnostics::{Diagnostic, DiagnosticSender},
    kind::RequestKind,
    message::{Message, Payload},
};
use crate::{config::BridgeConfig, BridgeError, BridgeResult};

pub type RequestId = String;

/// Payload field carrying the correlation id when correlation is enabled.
pub const REQUEST_ID_FIELD: &str = "request_id";

/// Externally owned flag whose activation fires a request.
///
/// Clones share the same flag. The bridge resets it after sending.
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    flag: Arc<AtomicBool>,
}

impl Trigger {
    pub fn new(initial: bool) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("trigger not set")]
    TriggerNotSet,
    #[error("channel not connected")]
    Disconnected,
    #[error("name is empty")]
    EmptyName,
    #[error("no strategy given")]
    MissingStrategy,
    #[error("unsupported mode: {mode}")]
    UnsupportedMode { mode: String },
    #[error("send failed: {message}")]
    SendFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed(RequestId),
    Dropped(DropReason),
}

impl ArmOutcome {
    pub fn is_armed(&self) -> bool {
        matches!(self, ArmOutcome::Armed(_))
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ArmOutcome::Armed(id) => Some(id),
            ArmOutcome::Dropped(_) => None,
        }
    }
}

/// A response delivered on the kind's response event.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub kind: RequestKind,
    /// Set when correlation is enabled.
    pub request_id: Option<RequestId>,
    pub payload: Value,
}

impl Response {
    /// The design service answers `false` when it fails to build a design.
    pub fn is_failure(&self) -> bool {
        matches!(self.payload, Value::Null | Value::Bool(false))
    }

    /// The payload, or `None` for a failure answer.
    pub fn into_value(self) -> Option<Value> {
        if self.is_failure() {
            None
        } else {
            Some(self.payload)
        }
    }
}

type ResponseCallback = Box<dyn FnOnce(BridgeResult<Response>) + Send>;

struct ArmedListener {
    request_id: RequestId,
    listener_id: ListenerId,
    callback: ResponseCallback,
    timer: Option<JoinHandle<()>>,
}

/// State shared between the bridge, its channel listener and its timer task.
/// Holds no reference to the channel, so a registered listener never keeps the
/// channel alive.
struct BridgeInner {
    kind: RequestKind,
    correlation: bool,
    armed: Mutex<Option<ArmedListener>>,
    diagnostics: DiagnosticSender,
}

impl BridgeInner {
    fn slot(&self) -> MutexGuard<'_, Option<ArmedListener>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self) -> Option<ArmedListener> {
        self.slot().take()
    }

    /// Takes the armed listener only if it still belongs to `request_id`.
    fn take_if(&self, request_id: &str) -> Option<ArmedListener> {
        let mut slot = self.slot();
        if slot
            .as_ref()
            .is_some_and(|armed| armed.request_id == request_id)
        {
            slot.take()
        } else {
            None
        }
    }

    /// Deregisters, stops the timer, reports and completes the callback.
    /// Must be called without the slot lock held.
    fn release<C: Channel + ?Sized>(
        &self,
        channel: Option<&C>,
        armed: ArmedListener,
        diagnostic: Diagnostic,
        result: BridgeResult<Response>,
    ) {
        if let Some(channel) = channel {
            channel.off(self.kind.response_event(), armed.listener_id);
        }
        if let Some(timer) = armed.timer {
            timer.abort();
        }
        self.diagnostics.report(diagnostic);
        (armed.callback)(result);
    }

    fn on_response<C: Channel>(&self, channel: &Weak<C>, request_id: &str, payload: &Value) {
        if self.correlation && !echoes_request_id(payload, request_id) {
            self.diagnostics.report(Diagnostic::Ignored {
                kind: self.kind,
                request_id: request_id.to_string(),
                echoed: payload
                    .get(REQUEST_ID_FIELD)
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
            return;
        }
        let Some(armed) = self.take_if(request_id) else {
            trace!("Late {} for released request {}", self.kind.response_event(), request_id);
            return;
        };
        let response = Response {
            kind: self.kind,
            request_id: self.correlation.then(|| request_id.to_string()),
            payload: payload.clone(),
        };
        self.release(
            channel.upgrade().as_deref(),
            armed,
            Diagnostic::Delivered {
                kind: self.kind,
                request_id: request_id.to_string(),
            },
            Ok(response),
        );
    }

    fn cancel<C: Channel + ?Sized>(&self, channel: Option<&C>, armed: ArmedListener) {
        let request_id = armed.request_id.clone();
        self.release(
            channel,
            armed,
            Diagnostic::Cancelled {
                kind: self.kind,
                request_id,
            },
            Err(BridgeError::Cancelled { kind: self.kind }),
        );
    }
}

fn echoes_request_id(payload: &Value, request_id: &str) -> bool {
    payload
        .get(REQUEST_ID_FIELD)
        .and_then(Value::as_str)
        .is_some_and(|echoed| echoed == request_id)
}

fn has_name(payload: &Payload) -> bool {
    match payload.get("name") {
        None | Some(Value::Null) => false,
        Some(Value::String(name)) => !name.is_empty(),
        Some(_) => true,
    }
}

/// # Bridge
///
/// Pairs one [`RequestKind`] with a shared [`Channel`]. See the module docs
/// for the listener lifecycle.
pub struct Bridge<C: Channel + 'static> {
    channel: Arc<C>,
    kind: RequestKind,
    config: BridgeConfig,
    inner: Arc<BridgeInner>,
}

impl<C: Channel + 'static> Bridge<C> {
    pub fn new(channel: Arc<C>, kind: RequestKind, config: &BridgeConfig) -> Self {
        Self {
            channel,
            kind,
            inner: Arc::new(BridgeInner {
                kind,
                correlation: config.correlation,
                armed: Mutex::new(None),
                diagnostics: DiagnosticSender::new(config.event_buffer_size),
            }),
            config: config.clone(),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn is_armed(&self) -> bool {
        self.inner.slot().is_some()
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.inner.diagnostics.subscribe()
    }

    /// Sends one request if `trigger` is set and the payload passes the
    /// guards, then arms a one-shot listener for the response.
    ///
    /// The message is emitted before the listener is registered, and the
    /// trigger is reset after both, without waiting for the response.
    /// `on_response` runs exactly once for an armed request: with the
    /// response, or with `Timeout`, `Superseded` or `Cancelled`. It never
    /// runs for a dropped request.
    pub fn arm<F>(&self, trigger: &Trigger, payload: &Payload, on_response: F) -> ArmOutcome
    where
        F: FnOnce(BridgeResult<Response>) + Send + 'static,
    {
        if let Err(reason) = self.check(trigger, payload) {
            return self.dropped(reason);
        }

        let request_id = Uuid::new_v4().to_string();
        let mut message = Message::request(self.kind, payload);
        if self.config.correlation {
            if let Value::Object(fields) = &mut message.payload {
                fields.insert(
                    REQUEST_ID_FIELD.to_string(),
                    Value::String(request_id.clone()),
                );
            }
        }
        if let Err(e) = self.channel.emit(message) {
            let reason = match e {
                BridgeError::Disconnected => DropReason::Disconnected,
                other => DropReason::SendFailed {
                    message: other.to_string(),
                },
            };
            return self.dropped(reason);
        }
        self.inner.diagnostics.report(Diagnostic::Emitted {
            kind: self.kind,
            request_id: request_id.clone(),
        });

        let listener: Listener = {
            let inner = self.inner.clone();
            let channel = Arc::downgrade(&self.channel);
            let request_id = request_id.clone();
            Arc::new(move |payload: &Value| inner.on_response(&channel, &request_id, payload))
        };
        let (listener_id, previous) = {
            // Held across registration so a fast response waits for the slot,
            // and so concurrent arms always see each other's listener.
            let mut slot = self.inner.slot();
            let listener_id = self.channel.on(self.kind.response_event(), listener);
            let previous = slot.replace(ArmedListener {
                request_id: request_id.clone(),
                listener_id,
                callback: Box::new(on_response),
                timer: self.spawn_timer(&request_id),
            });
            (listener_id, previous)
        };
        if let Some(previous) = previous {
            let previous_id = previous.request_id.clone();
            self.inner.release(
                Some(self.channel.as_ref()),
                previous,
                Diagnostic::Superseded {
                    kind: self.kind,
                    request_id: previous_id,
                },
                Err(BridgeError::Superseded { kind: self.kind }),
            );
        }
        self.inner.diagnostics.report(Diagnostic::Armed {
            kind: self.kind,
            request_id: request_id.clone(),
            listener_id,
        });

        trigger.reset();
        ArmOutcome::Armed(request_id)
    }

    /// Fires a request and waits for its response.
    ///
    /// Dropping the returned future before it resolves cancels the request
    /// and deregisters its listener.
    #[instrument(skip(self, payload), fields(kind = %self.kind))]
    pub async fn request(&self, payload: &Payload) -> BridgeResult<Response> {
        let trigger = Trigger::new(true);
        let (tx, rx) = oneshot::channel();
        let outcome = self.arm(&trigger, payload, move |result| {
            let _ = tx.send(result);
        });
        let request_id = match outcome {
            ArmOutcome::Armed(request_id) => request_id,
            ArmOutcome::Dropped(reason) => return Err(BridgeError::Dropped(reason)),
        };

        let _guard = PendingGuard {
            bridge: self,
            request_id,
        };
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    /// Releases the armed listener, if any, completing it with `Cancelled`.
    pub fn dispose(&self) {
        if let Some(armed) = self.inner.take() {
            self.inner.cancel(Some(self.channel.as_ref()), armed);
        }
    }

    fn cancel_if(&self, request_id: &str) {
        if let Some(armed) = self.inner.take_if(request_id) {
            self.inner.cancel(Some(self.channel.as_ref()), armed);
        }
    }

    fn check(&self, trigger: &Trigger, payload: &Payload) -> Result<(), DropReason> {
        if !trigger.is_set() {
            return Err(DropReason::TriggerNotSet);
        }
        if !self.channel.is_connected() {
            return Err(DropReason::Disconnected);
        }
        if !has_name(payload) {
            return Err(DropReason::EmptyName);
        }
        // The activation is consumed from here on, even when the gate drops it.
        if let Err(reason) = self.check_kind(payload) {
            trigger.reset();
            return Err(reason);
        }
        Ok(())
    }

    fn check_kind(&self, payload: &Payload) -> Result<(), DropReason> {
        if self.kind.is_simulation() {
            let Some(required) = &self.config.simulation_mode else {
                return Ok(());
            };
            let mode = payload
                .get("mode")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return if mode == required {
                Ok(())
            } else {
                Err(DropReason::UnsupportedMode {
                    mode: mode.to_string(),
                })
            };
        }
        match payload.get("strategy") {
            None | Some(Value::Null) => Err(DropReason::MissingStrategy),
            Some(_) => Ok(()),
        }
    }

    fn dropped(&self, reason: DropReason) -> ArmOutcome {
        self.inner.diagnostics.report(Diagnostic::Dropped {
            kind: self.kind,
            reason: reason.clone(),
        });
        ArmOutcome::Dropped(reason)
    }

    fn spawn_timer(&self, request_id: &str) -> Option<JoinHandle<()>> {
        let timeout = self.config.response_timeout?;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            trace!("No runtime, response timeout for {} not enforced", request_id);
            return None;
        };
        let inner = self.inner.clone();
        let channel = Arc::downgrade(&self.channel);
        let request_id = request_id.to_string();
        Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(mut armed) = inner.take_if(&request_id) {
                // This task is the timer; dropping the handle detaches it.
                armed.timer = None;
                inner.release(
                    channel.upgrade().as_deref(),
                    armed,
                    Diagnostic::TimedOut {
                        kind: inner.kind,
                        request_id: request_id.clone(),
                    },
                    Err(BridgeError::Timeout {
                        kind: inner.kind,
                        request_id,
                    }),
                );
            }
        }))
    }
}

impl<C: Channel + 'static> Drop for Bridge<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Cancels the request if [`Bridge::request`] is dropped before resolving.
struct PendingGuard<'a, C: Channel + 'static> {
    bridge: &'a Bridge<C>,
    request_id: RequestId,
}

impl<C: Channel + 'static> Drop for PendingGuard<'_, C> {
    fn drop(&mut self) {
        self.bridge.cancel_if(&self.request_id);
    }
}
