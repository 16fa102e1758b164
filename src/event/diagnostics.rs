//! Observable record of bridge decisions.
//!
//! Silent drops never reach the caller of [`Bridge::arm`](super::bridge::Bridge::arm)
//! as errors. They are reported here instead, next to every other state change
//! of an armed listener, so hosts and tests can see what happened.

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use super::{
    bridge::{DropReason, RequestId},
    channel::ListenerId,
    kind::RequestKind,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    Dropped {
        kind: RequestKind,
        reason: DropReason,
    },
    Emitted {
        kind: RequestKind,
        request_id: RequestId,
    },
    Armed {
        kind: RequestKind,
        request_id: RequestId,
        listener_id: ListenerId,
    },
    Delivered {
        kind: RequestKind,
        request_id: RequestId,
    },
    /// A response arrived for `request_id`'s event carrying another id,
    /// `None` when it carried none.
    Ignored {
        kind: RequestKind,
        request_id: RequestId,
        echoed: Option<RequestId>,
    },
    TimedOut {
        kind: RequestKind,
        request_id: RequestId,
    },
    Cancelled {
        kind: RequestKind,
        request_id: RequestId,
    },
    Superseded {
        kind: RequestKind,
        request_id: RequestId,
    },
}

#[derive(Clone)]
pub struct DiagnosticSender {
    sender: broadcast::Sender<Diagnostic>,
}

impl DiagnosticSender {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.sender.subscribe()
    }

    /// Logs the diagnostic and hands it to current subscribers, if any.
    pub fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::Armed { .. } | Diagnostic::Ignored { .. } => {
                trace!("Bridge: {:?}", diagnostic)
            }
            Diagnostic::TimedOut { .. } => warn!("Bridge: {:?}", diagnostic),
            _ => debug!("Bridge: {:?}", diagnostic),
        }
        // No subscribers is the normal case outside tests.
        let _ = self.sender.send(diagnostic);
    }
}
