//! # design-bridge
//!
//! Client side of the design service protocol: named request events sent over
//! a shared bidirectional channel, each answered by exactly one response event.
//!
//! - Request/response pairing ([`event::bridge`])
//! - Channel abstraction and in-process channel ([`event::channel`])
//! - Service notifications ([`notifications`])
//! - Line-delimited JSON transport ([`transport`])
//! - Configuration ([`config`]) and errors ([`error`])

pub mod config;
pub mod error;
pub mod event;
pub mod notifications;
pub mod transport;

// Re-exports
pub use error::*;
pub use event::{
    bridge::{ArmOutcome, Bridge, DropReason, Response, Trigger},
    channel::{Channel, LocalChannel},
    kind::{RequestKind, Strategy},
    message::{Message, Payload},
};

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
