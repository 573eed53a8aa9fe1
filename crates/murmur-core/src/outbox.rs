//! Builds outbound events, seals them and puts them on the durable queue.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use murmur_shared::event::{ChatMessage, Introduce, IntroduceRequest};
use murmur_shared::{Endpoint, Event, EventPayload, MessageKind};
use murmur_store::{Database, Message, QueuedEvent, UserInfo};
use uuid::Uuid;

use crate::codec::EnvelopeCodec;
use crate::error::Result;
use crate::profile::LocalProfile;

#[derive(Clone)]
pub struct Outbox {
    db: Arc<Database>,
    codec: Arc<EnvelopeCodec>,
    profile: Arc<RwLock<LocalProfile>>,
}

impl Outbox {
    pub fn new(
        db: Arc<Database>,
        codec: Arc<EnvelopeCodec>,
        profile: Arc<RwLock<LocalProfile>>,
    ) -> Self {
        Self { db, codec, profile }
    }

    fn profile(&self) -> LocalProfile {
        self.profile
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Seal `event` for `recipient` and queue it for their endpoint.
    pub fn queue_event(&self, mut event: Event, recipient: &UserInfo) -> Result<QueuedEvent> {
        let body = self.codec.seal(&mut event, &recipient.public_key)?;
        let queued = self.db.enqueue_event(&body, &recipient.endpoint)?;
        tracing::debug!(
            kind = event.kind(),
            key_id = %recipient.key_id,
            endpoint = %recipient.endpoint,
            queue_id = queued.id,
            "Queued event"
        );
        Ok(queued)
    }

    /// Tell `recipient` who we are and where to reach us.
    pub fn send_introduce(&self, recipient: &UserInfo) -> Result<QueuedEvent> {
        let profile = self.profile();
        let event = Event::new(EventPayload::Introduce(Introduce {
            public_key: self.codec.crypto().public_key_armored(),
            endpoint: profile.endpoint,
            username: profile.username,
        }));
        self.queue_event(event, recipient)
    }

    /// Ask whoever listens at `endpoint` to introduce themselves. The
    /// recipient's key is not known yet, so this goes out in plaintext.
    pub fn request_introduction(&self, endpoint: &Endpoint) -> Result<QueuedEvent> {
        let mut event = Event::new(EventPayload::IntroduceRequest(IntroduceRequest {
            public_key: self.codec.crypto().public_key_armored(),
            endpoint: self.profile().endpoint,
        }));
        let body = self.codec.encode_plain(&mut event)?;
        let queued = self.db.enqueue_event(&body, endpoint)?;
        tracing::debug!(endpoint = %endpoint, queue_id = queued.id, "Queued introduction request");
        Ok(queued)
    }

    /// Queue a chat message and record it as outgoing.
    pub fn send_message(&self, recipient: &UserInfo, text: &str, kind: MessageKind) -> Result<Message> {
        let msg_uuid = Uuid::new_v4().to_string();
        let event = Event::new(EventPayload::Message(ChatMessage {
            text: text.to_string(),
            msg_uuid: msg_uuid.clone(),
            kind,
        }));
        self.queue_event(event, recipient)?;

        let mut message = Message {
            id: 0,
            key_id: recipient.key_id.clone(),
            body: text.to_string(),
            kind,
            msg_uuid,
            incoming: false,
            created_at: Utc::now(),
        };
        message.id = self.db.insert_message(&message)?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use murmur_shared::{CryptoAdapter, Identity};

    use super::*;
    use crate::testing::{contact_for, temp_db};

    fn outbox(identity: &Identity, db: Arc<Database>) -> Outbox {
        let profile = LocalProfile {
            username: "alice".to_string(),
            bio: String::new(),
            endpoint: Endpoint::parse("i2p://alice.b32.i2p/alice").unwrap(),
        };
        Outbox::new(
            db,
            Arc::new(EnvelopeCodec::new(Arc::new(identity.clone()))),
            Arc::new(RwLock::new(profile)),
        )
    }

    #[test]
    fn test_send_message_queues_and_records() {
        let (_dir, db) = temp_db();
        let alice = Identity::generate();
        let bob = Identity::generate();
        let contact = contact_for(&bob, "i2p://bob.b32.i2p/bob");

        let message = outbox(&alice, db.clone())
            .send_message(&contact, "hello", MessageKind::Text)
            .unwrap();
        assert!(!message.incoming);
        assert!(message.id > 0);

        let queued = db.queued_events_for_endpoint(&contact.endpoint).unwrap();
        assert_eq!(queued.len(), 1);
        let armored = String::from_utf8(queued[0].body.clone()).unwrap();
        let keyring = vec![alice.public_key_armored()];
        assert!(bob.decrypt(&armored, &keyring).is_ok());
    }

    #[test]
    fn test_introduce_is_plaintext_with_own_endpoint() {
        let (_dir, db) = temp_db();
        let alice = Identity::generate();
        let contact = contact_for(&Identity::generate(), "i2p://bob.b32.i2p/bob");

        let queued = outbox(&alice, db).send_introduce(&contact).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&queued.body).unwrap();
        assert_eq!(value["type"], "introduce");
        assert_eq!(value["data"]["endpoints"], "i2p://alice.b32.i2p/alice");
        assert_eq!(value["data"]["username"], "alice");
    }

    #[test]
    fn test_request_introduction_targets_endpoint() {
        let (_dir, db) = temp_db();
        let target = Endpoint::parse("tor://bob.onion/bob").unwrap();
        let queued = outbox(&Identity::generate(), db)
            .request_introduction(&target)
            .unwrap();
        assert_eq!(queued.endpoint, target);
        let value: serde_json::Value = serde_json::from_slice(&queued.body).unwrap();
        assert_eq!(value["type"], "introduce.request");
    }
}
