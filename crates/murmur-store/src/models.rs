//! Domain model structs persisted in the node database.

use chrono::{DateTime, Utc};
use murmur_shared::{Endpoint, KeyId, MessageKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Local identity
// ---------------------------------------------------------------------------

/// The node's own key material and public profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Hex-encoded Ed25519 secret key.
    pub secret_key_hex: String,
    pub username: String,
    pub bio: String,
    /// Where peers reach this node.
    pub endpoint: Endpoint,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A known peer. Unique by fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    /// Row id, `0` before the first save.
    pub id: i64,
    pub username: String,
    /// Armored public key.
    pub public_key: String,
    /// Lower-hex fingerprint of `public_key`.
    pub fingerprint: String,
    pub key_id: KeyId,
    pub endpoint: Endpoint,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    /// Key id of the contact this message was exchanged with.
    pub key_id: KeyId,
    pub body: String,
    pub kind: MessageKind,
    pub msg_uuid: String,
    pub incoming: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Outbound queue
// ---------------------------------------------------------------------------

/// A sealed payload waiting to be delivered to `endpoint`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedEvent {
    pub id: i64,
    pub body: Vec<u8>,
    pub endpoint: Endpoint,
    pub created_at: DateTime<Utc>,
    pub last_relayed: Option<DateTime<Utc>>,
    pub relay_tries: u32,
}

/// Backoff state of one destination. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointStats {
    pub endpoint: String,
    /// Consecutive failed deliveries.
    pub fail_streak: u32,
    /// Remaining relay ticks to skip before the next attempt.
    pub current_delay: u32,
    /// Set when a countdown ran out; the next tick may attempt delivery.
    pub delay_elapsed: bool,
    pub last_contact_out: Option<DateTime<Utc>>,
}

impl EndpointStats {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            fail_streak: 0,
            current_delay: 0,
            delay_elapsed: false,
            last_contact_out: None,
        }
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// A content-addressed file object shared with (or by) one contact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileStoreElement {
    pub id: i64,
    /// Contact the object is shared with.
    pub owner_key_id: KeyId,
    pub uuid: Uuid,
    /// Logical path shown to users, e.g. `/Unsort/notes.txt`.
    pub path: String,
    /// BLAKE3 hex digest of the stored bytes.
    pub content_hash: String,
    pub size_bytes: u64,
    pub modify_time: DateTime<Utc>,
    /// Tombstone, kept so the deletion can be announced.
    pub is_deleted: bool,
    pub is_downloading: bool,
    /// Remote location to pull newer content from, if a download is pending.
    pub external_http_path: Option<String>,
    pub created_at: DateTime<Utc>,
}
