//! # Request/Response over a shared channel
//!
//! One bidirectional channel connects the client to the design service. Any
//! number of bridges share it, each owning one request kind:
//!
//! ```text
//! ┌────────┐  create-design     ┌─────────┐  frames  ┌─────────┐
//! │ Bridge │───────────────────▶│         │─────────▶│ design  │
//! │        │◀───────────────────│ Channel │◀─────────│ service │
//! └────────┘  design-created    └─────────┘          └─────────┘
//! ```
//!
//! - [`kind`]: the closed set of request kinds and their event names
//! - [`message`]: frames and payloads
//! - [`channel`]: the channel abstraction and its in-process implementation
//! - [`bridge`]: the one-request, one-response pairing with listener cleanup
//! - [`diagnostics`]: observable record of what each bridge decided
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use design_bridge::config::BridgeConfig;
//! # use design_bridge::event::{bridge::{Bridge, Trigger}, channel::LocalChannel, kind::RequestKind};
//! # use serde_json::json;
//! let channel = Arc::new(LocalChannel::connected(64));
//! let bridge = Bridge::new(channel.clone(), RequestKind::CreateDesign, &BridgeConfig::default());
//! let trigger = Trigger::new(true);
//! let payload = json!({"strategy": "strategy_random", "name": "A"});
//!
//! bridge.arm(&trigger, payload.as_object().unwrap(), |result| match result {
//!     Ok(response) => println!("graph: {:?}", response.into_value()),
//!     Err(e) => println!("no graph: {}", e),
//! });
//! assert!(!trigger.is_set());
//! ```

pub mod bridge;
pub mod channel;
pub mod diagnostics;
pub mod kind;
pub mod message;
