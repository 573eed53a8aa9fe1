//! Applies decoded events to local state.

use std::sync::Arc;

use chrono::Utc;
use murmur_shared::event::{ChatMessage, FileAnnouncement, Introduce, IntroduceRequest};
use murmur_shared::{CryptoAdapter, Event, EventPayload, KeyId};
use murmur_store::{Database, Message, StoreError, UserInfo};

use crate::callbacks::Callbacks;
use crate::error::{CoreError, Result};
use crate::filesync::FileSync;
use crate::outbox::Outbox;

pub struct Dispatcher {
    db: Arc<Database>,
    crypto: Arc<dyn CryptoAdapter>,
    outbox: Outbox,
    files: FileSync,
    callbacks: Callbacks,
    mini: bool,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Database>,
        crypto: Arc<dyn CryptoAdapter>,
        outbox: Outbox,
        files: FileSync,
        callbacks: Callbacks,
        mini: bool,
    ) -> Self {
        Self {
            db,
            crypto,
            outbox,
            files,
            callbacks,
            mini,
        }
    }

    /// Apply each event in order. A failing event is logged and does not
    /// stop the rest. Returns how many were applied.
    pub async fn dispatch(&self, events: Vec<Event>) -> usize {
        let mut applied = 0;
        for event in &events {
            match self.dispatch_one(event).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::warn!(kind = event.kind(), error = %e, "Failed to apply event");
                }
            }
        }
        applied
    }

    pub async fn dispatch_one(&self, event: &Event) -> Result<()> {
        self.callbacks.emit_event(event);
        match &event.payload {
            EventPayload::Introduce(intro) => self.on_introduce(event, intro),
            EventPayload::IntroduceRequest(req) => self.on_introduce_request(req),
            EventPayload::Message(msg) => self.on_message(event, msg),
            EventPayload::File(ann) => self.on_file(event, ann).await,
            EventPayload::Unknown { kind, .. } => {
                tracing::info!(kind = %kind, "Ignoring unknown event kind");
                Ok(())
            }
        }
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<UserInfo>> {
        match self.db.get_user_by_fingerprint(fingerprint) {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn sender_contact(&self, sender: &KeyId) -> Result<Option<UserInfo>> {
        match self.db.get_user_by_key_id(sender) {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Unsigned introductions may create a contact or fill in blanks, but
    /// never replace what a known contact already told us.
    fn on_introduce(&self, event: &Event, intro: &Introduce) -> Result<()> {
        let fingerprint = self.crypto.fingerprint(&intro.public_key)?;
        let key_id = KeyId::new(&fingerprint);
        if let Some(sender) = &event.sender {
            if sender != &key_id {
                return Err(CoreError::InvalidInput(format!(
                    "introduce for {key_id} signed by {sender}"
                )));
            }
        }

        let user = match self.find_by_fingerprint(&fingerprint)? {
            None => UserInfo {
                id: 0,
                username: intro.username.clone(),
                public_key: intro.public_key.clone(),
                fingerprint,
                key_id,
                endpoint: intro.endpoint.clone(),
                created_at: Utc::now(),
            },
            Some(mut known) => {
                let signed = event.sender.is_some();
                if !intro.username.is_empty() && (signed || known.username.is_empty()) {
                    known.username = intro.username.clone();
                }
                if !intro.endpoint.is_empty() && (signed || known.endpoint.is_empty()) {
                    known.endpoint = intro.endpoint.clone();
                }
                known
            }
        };

        let user = self.db.upsert_user(&user)?;
        tracing::info!(key_id = %user.key_id, username = %user.username, "Contact introduced");
        self.callbacks.emit_introduce(&user, event);
        Ok(())
    }

    /// Record the requester and answer with exactly one introduction.
    fn on_introduce_request(&self, req: &IntroduceRequest) -> Result<()> {
        let fingerprint = self.crypto.fingerprint(&req.public_key)?;
        let user = match self.find_by_fingerprint(&fingerprint)? {
            Some(mut known) => {
                if known.endpoint.is_empty() {
                    known.endpoint = req.endpoint.clone();
                }
                known
            }
            None => UserInfo {
                id: 0,
                username: String::new(),
                public_key: req.public_key.clone(),
                key_id: KeyId::new(&fingerprint),
                fingerprint,
                endpoint: req.endpoint.clone(),
                created_at: Utc::now(),
            },
        };
        let user = self.db.upsert_user(&user)?;
        self.outbox.send_introduce(&user)?;
        tracing::info!(key_id = %user.key_id, endpoint = %user.endpoint, "Answered introduction request");
        Ok(())
    }

    fn on_message(&self, event: &Event, msg: &ChatMessage) -> Result<()> {
        let Some(sender) = event.sender.as_ref().filter(|s| !s.is_empty()) else {
            tracing::warn!("Dropping message without a verified sender");
            return Ok(());
        };

        let mut message = Message {
            id: 0,
            key_id: KeyId::new(sender.as_str()),
            body: msg.text.clone(),
            kind: msg.kind,
            msg_uuid: msg.msg_uuid.clone(),
            incoming: true,
            created_at: Utc::now(),
        };
        if !self.mini {
            message.id = self.db.insert_message(&message)?;
        }

        let Some(user) = self.sender_contact(&message.key_id)? else {
            tracing::warn!(key_id = %message.key_id, "Message from unknown contact");
            return Ok(());
        };
        tracing::debug!(key_id = %user.key_id, id = message.id, "Received message");
        self.callbacks.emit_message(&user, event, &message);
        Ok(())
    }

    async fn on_file(&self, event: &Event, ann: &FileAnnouncement) -> Result<()> {
        let Some(sender) = event.sender.as_ref() else {
            tracing::warn!(uuid = %ann.uuid, "Dropping file announcement without a verified sender");
            return Ok(());
        };
        let Some(user) = self.sender_contact(sender)? else {
            tracing::warn!(key_id = %sender, "File announcement from unknown contact");
            return Ok(());
        };
        if let Some(element) = self.files.apply_remote(&user, ann).await? {
            self.callbacks.emit_file(&user, &element, true);
        }
        Ok(())
    }
}
