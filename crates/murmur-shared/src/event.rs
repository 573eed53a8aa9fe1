//! Protocol events and their JSON wire envelope.
//!
//! On the wire every event is `{"type": .., "data": .., "uuid": ..}` where
//! `data` only carries the fields of the active kind. In memory the kinds are
//! a sum type, so an event can never hold fields of another kind.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::error::MurmurError;
use crate::types::KeyId;

pub const KIND_INTRODUCE: &str = "introduce";
pub const KIND_INTRODUCE_REQUEST: &str = "introduce.request";
pub const KIND_MESSAGE: &str = "message";
pub const KIND_FILE: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Service,
    Hidden,
    #[serde(other)]
    Unimplemented,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Service => "service",
            MessageKind::Hidden => "hidden",
            MessageKind::Unimplemented => "unimplemented",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "text" => MessageKind::Text,
            "service" => MessageKind::Service,
            "hidden" => MessageKind::Hidden,
            _ => MessageKind::Unimplemented,
        }
    }
}

/// Announces a peer's public key, endpoint and display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Introduce {
    #[serde(rename = "publickey")]
    pub public_key: String,
    #[serde(rename = "endpoints", default)]
    pub endpoint: Endpoint,
    #[serde(default)]
    pub username: String,
}

/// Asks the receiver to answer with an [`Introduce`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntroduceRequest {
    #[serde(rename = "selfpublickey")]
    pub public_key: String,
    #[serde(default)]
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "msguuid", default)]
    pub msg_uuid: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

/// Metadata of one shared file object, sent whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnnouncement {
    pub uuid: Uuid,
    /// Locator relative to the sender's endpoint, `files/<owner>/<uuid>/<hash>`.
    #[serde(default)]
    pub http_path: String,
    pub path: String,
    pub hash: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub is_deleted: bool,
    pub modify_time: DateTime<Utc>,
    /// Base64 content for small files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
}

impl FileAnnouncement {
    pub fn with_inline_bytes(mut self, content: &[u8]) -> Self {
        self.bytes = Some(STANDARD.encode(content));
        self
    }

    pub fn inline_bytes(&self) -> Option<Result<Vec<u8>, MurmurError>> {
        self.bytes.as_ref().map(|b| {
            STANDARD
                .decode(b)
                .map_err(|e| MurmurError::Serialization(e.to_string()))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Introduce(Introduce),
    IntroduceRequest(IntroduceRequest),
    Message(ChatMessage),
    File(FileAnnouncement),
    /// A kind this node does not understand; kept so it can be logged.
    Unknown { kind: String, data: Value },
}

impl EventPayload {
    pub fn kind(&self) -> &str {
        match self {
            EventPayload::Introduce(_) => KIND_INTRODUCE,
            EventPayload::IntroduceRequest(_) => KIND_INTRODUCE_REQUEST,
            EventPayload::Message(_) => KIND_MESSAGE,
            EventPayload::File(_) => KIND_FILE,
            EventPayload::Unknown { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Absent until the event is sealed.
    pub id: Option<Uuid>,
    pub payload: EventPayload,
    /// Key id of the contact whose signature verified, never on the wire.
    pub sender: Option<KeyId>,
}

/// Raw `{"type","data","uuid"}` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub uuid: String,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: None,
            payload,
            sender: None,
        }
    }

    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Mint an id if the event has none yet and return it.
    pub fn ensure_id(&mut self) -> Uuid {
        *self.id.get_or_insert_with(Uuid::new_v4)
    }

    /// Handshake kinds travel unencrypted: the receiver may not know the
    /// sender's key yet.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::Introduce(_) | EventPayload::IntroduceRequest(_)
        )
    }

    pub fn to_wire(&self) -> Result<WireEvent, MurmurError> {
        let id = self
            .id
            .ok_or_else(|| MurmurError::Protocol("event has no uuid".to_string()))?;
        let data = match &self.payload {
            EventPayload::Introduce(d) => serde_json::to_value(d),
            EventPayload::IntroduceRequest(d) => serde_json::to_value(d),
            EventPayload::Message(d) => serde_json::to_value(d),
            EventPayload::File(d) => serde_json::to_value(d),
            EventPayload::Unknown { data, .. } => Ok(data.clone()),
        }
        .map_err(|e| MurmurError::Serialization(e.to_string()))?;

        Ok(WireEvent {
            kind: self.kind().to_string(),
            data,
            uuid: id.to_string(),
        })
    }

    pub fn from_wire(wire: WireEvent) -> Result<Self, MurmurError> {
        let id = Uuid::parse_str(&wire.uuid)
            .map_err(|e| MurmurError::Protocol(format!("bad event uuid: {e}")))?;
        let ser = |e: serde_json::Error| MurmurError::Serialization(e.to_string());

        let payload = match wire.kind.as_str() {
            KIND_INTRODUCE => EventPayload::Introduce(serde_json::from_value(wire.data).map_err(ser)?),
            KIND_INTRODUCE_REQUEST => {
                EventPayload::IntroduceRequest(serde_json::from_value(wire.data).map_err(ser)?)
            }
            KIND_MESSAGE => EventPayload::Message(serde_json::from_value(wire.data).map_err(ser)?),
            KIND_FILE => EventPayload::File(serde_json::from_value(wire.data).map_err(ser)?),
            other => EventPayload::Unknown {
                kind: other.to_string(),
                data: wire.data,
            },
        };

        Ok(Self {
            id: Some(id),
            payload,
            sender: None,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, MurmurError> {
        serde_json::to_vec(&self.to_wire()?).map_err(|e| MurmurError::Serialization(e.to_string()))
    }
}

/// Try to read `bytes` as plaintext events.
///
/// Returns `None` when the bytes are neither a JSON array nor a single event
/// object with a non-empty uuid, in which case the caller should treat them as
/// ciphertext. Malformed entries inside a batch are dropped with a warning.
pub fn decode_plaintext(bytes: &[u8]) -> Option<Vec<Event>> {
    match serde_json::from_slice::<Value>(bytes).ok()? {
        Value::Array(items) => Some(items.into_iter().filter_map(decode_value).collect()),
        value @ Value::Object(_) => {
            let wire: WireEvent = serde_json::from_value(value).ok()?;
            if wire.uuid.is_empty() {
                return None;
            }
            Some(decode_wire(wire).into_iter().collect())
        }
        _ => None,
    }
}

fn decode_value(value: Value) -> Option<Event> {
    match serde_json::from_value::<WireEvent>(value) {
        Ok(wire) => decode_wire(wire),
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed event in batch");
            None
        }
    }
}

fn decode_wire(wire: WireEvent) -> Option<Event> {
    let kind = wire.kind.clone();
    match Event::from_wire(wire) {
        Ok(evt) => Some(evt),
        Err(e) => {
            tracing::warn!(kind = %kind, error = %e, "Dropping malformed event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> Event {
        Event::new(EventPayload::Message(ChatMessage {
            text: text.to_string(),
            msg_uuid: String::new(),
            kind: MessageKind::Text,
        }))
    }

    #[test]
    fn test_wire_shape_only_carries_active_variant() {
        let mut evt = message("hi");
        let id = evt.ensure_id();
        let value: Value = serde_json::from_slice(&evt.encode().unwrap()).unwrap();

        assert_eq!(value["type"], "message");
        assert_eq!(value["uuid"], id.to_string());
        assert_eq!(value["data"]["text"], "hi");
        assert_eq!(value["data"]["type"], "text");
        assert!(value["data"].get("publickey").is_none());
    }

    #[test]
    fn test_encode_without_id_fails() {
        assert!(message("x").encode().is_err());
    }

    #[test]
    fn test_introduce_field_names() {
        let json = r#"{"type":"introduce","uuid":"6f1c8f5e-3d6a-4a53-9a55-7d0f6b8f1e20",
            "data":{"publickey":"PK","endpoints":"i2p://abc.b32.i2p/alice","username":"alice"}}"#;
        let events = decode_plaintext(json.as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::Introduce(intro) => {
                assert_eq!(intro.public_key, "PK");
                assert_eq!(intro.endpoint.account(), Some("alice"));
                assert_eq!(intro.username, "alice");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_batch_drops_malformed_entries() {
        let mut good = message("ok");
        good.ensure_id();
        let good = serde_json::to_value(good.to_wire().unwrap()).unwrap();
        let batch = serde_json::json!([good, {"type": "message", "data": {}, "uuid": "not-a-uuid"}, 42]);

        let events = decode_plaintext(&serde_json::to_vec(&batch).unwrap()).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let json = r#"{"type":"file.request","data":{"start":1},"uuid":"6f1c8f5e-3d6a-4a53-9a55-7d0f6b8f1e20"}"#;
        let events = decode_plaintext(json.as_bytes()).unwrap();
        assert_eq!(events[0].kind(), "file.request");
    }

    #[test]
    fn test_object_without_uuid_is_not_plaintext() {
        assert!(decode_plaintext(br#"{"type":"message","data":{}}"#).is_none());
        assert!(decode_plaintext(b"-----BEGIN MURMUR MESSAGE-----").is_none());
    }

    #[test]
    fn test_file_inline_bytes() {
        let ann = FileAnnouncement {
            uuid: Uuid::new_v4(),
            http_path: String::new(),
            path: "/notes.txt".to_string(),
            hash: "h".to_string(),
            size_bytes: 3,
            is_deleted: false,
            modify_time: Utc::now(),
            bytes: None,
        }
        .with_inline_bytes(b"abc");
        let value = serde_json::to_value(&ann).unwrap();
        assert!(value.get("sizeBytes").is_some());
        assert_eq!(ann.inline_bytes().unwrap().unwrap(), b"abc");
    }
}
