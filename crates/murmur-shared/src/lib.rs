//! # murmur-shared
//!
//! Types shared by every murmur crate: endpoints, key ids, the event sum type
//! and its wire envelope, and the cryptographic identity used to seal
//! envelopes between peers.

pub mod armor;
pub mod constants;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod identity;
pub mod types;

pub use crypto::CryptoAdapter;
pub use endpoint::{Endpoint, Scheme};
pub use error::{CryptoError, EndpointError, IdentityError, MurmurError};
pub use event::{Event, EventPayload, FileAnnouncement, MessageKind};
pub use identity::{Identity, PublicKeyBundle};
pub use types::KeyId;
