//! # murmur-core
//!
//! The protocol engine of a murmur node:
//!
//! - **Envelope codec**: seals events for a peer and unseals inbound bytes,
//!   attributing them to the contact whose signature verifies
//! - **Relay engine**: drains the durable outbound queue with per-destination
//!   backoff and single-flight delivery
//! - **File sync**: content-addressed file objects with change detection and
//!   bounded, single-flight downloads
//! - **Dispatcher**: applies decoded events to local state and fires callbacks
//!
//! [`Node`] wires everything together and owns the background workers.

pub mod backoff;
pub mod callbacks;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filesync;
pub mod node;
pub mod outbox;
pub mod profile;
pub mod registry;
pub mod relay;
pub mod transport;

#[cfg(test)]
mod testing;

pub use callbacks::Callbacks;
pub use codec::{EnvelopeCodec, Unsealed};
pub use config::EngineConfig;
pub use dispatcher::Dispatcher;
pub use error::{CoreError, Result, TransportError};
pub use filesync::{DownloadOutcome, FileSync};
pub use node::Node;
pub use outbox::Outbox;
pub use profile::{DiscoveredProfile, LocalProfile};
pub use relay::{RelayEngine, RelayOutcome};
pub use transport::{HttpTransport, Transport};
