//! Sealing and unsealing of event envelopes.

use std::sync::Arc;

use murmur_shared::event::decode_plaintext;
use murmur_shared::{CryptoAdapter, CryptoError, Event, KeyId};
use murmur_store::UserInfo;

use crate::error::{CoreError, Result};

/// Plaintext may wrap ciphertext which wraps plaintext; this bounds how deep.
const MAX_NESTING: usize = 4;

/// Events recovered from one inbound payload.
#[derive(Debug, Default)]
pub struct Unsealed {
    pub events: Vec<Event>,
    /// Contact whose signature verified the outermost ciphertext, if any.
    pub sender: Option<KeyId>,
}

pub struct EnvelopeCodec {
    crypto: Arc<dyn CryptoAdapter>,
}

impl EnvelopeCodec {
    pub fn new(crypto: Arc<dyn CryptoAdapter>) -> Self {
        Self { crypto }
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoAdapter> {
        &self.crypto
    }

    /// Serialize without encryption, minting an id if needed.
    pub fn encode_plain(&self, event: &mut Event) -> Result<Vec<u8>> {
        event.ensure_id();
        Ok(event.encode()?)
    }

    /// Seal `event` for the holder of `recipient_public_key`.
    ///
    /// Handshake events (`introduce`, `introduce.request`) stay plaintext;
    /// everything else is encrypted to the recipient and signed.
    pub fn seal(&self, event: &mut Event, recipient_public_key: &str) -> Result<Vec<u8>> {
        let plain = self.encode_plain(event)?;
        if event.is_handshake() {
            return Ok(plain);
        }
        let armored = self.crypto.encrypt_sign(recipient_public_key, &plain)?;
        Ok(armored.into_bytes())
    }

    /// Recover events from inbound bytes and attribute them to a contact.
    ///
    /// Plaintext (a JSON array, or one object carrying a uuid) is taken as
    /// is and left unattributed. Anything else must decrypt with the local
    /// key and verify against one of `contacts`.
    pub fn unseal(&self, bytes: &[u8], contacts: &[UserInfo]) -> Result<Unsealed> {
        self.unseal_at(bytes, contacts, None, 0)
    }

    fn unseal_at(
        &self,
        bytes: &[u8],
        contacts: &[UserInfo],
        sender: Option<KeyId>,
        depth: usize,
    ) -> Result<Unsealed> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            tracing::warn!("Received empty envelope");
            return Ok(Unsealed::default());
        }
        if depth > MAX_NESTING {
            return Err(CoreError::TooDeep(MAX_NESTING));
        }

        if let Some(mut events) = decode_plaintext(bytes) {
            for event in &mut events {
                event.sender = sender.clone();
            }
            return Ok(Unsealed { events, sender });
        }

        let armored = std::str::from_utf8(bytes)
            .map_err(|_| CryptoError::MalformedArmor("envelope is not text".to_string()))?;
        let keyring: Vec<String> = contacts.iter().map(|c| c.public_key.clone()).collect();
        let plaintext = self.crypto.decrypt(armored, &keyring)?;

        let sender = self.resolve_sender(armored, contacts);
        tracing::debug!(
            sender = sender.as_ref().map(KeyId::as_str).unwrap_or("unknown"),
            "Decrypted envelope"
        );
        self.unseal_at(&plaintext, contacts, sender, depth + 1)
    }

    /// Find the contact whose key verifies `armored`.
    ///
    /// Costs one trial decryption per contact.
    pub fn resolve_sender(&self, armored: &str, contacts: &[UserInfo]) -> Option<KeyId> {
        contacts
            .iter()
            .find(|contact| {
                self.crypto
                    .decrypt(armored, std::slice::from_ref(&contact.public_key))
                    .is_ok()
            })
            .map(|contact| contact.key_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use murmur_shared::event::{ChatMessage, Introduce};
    use murmur_shared::{Endpoint, EventPayload, Identity, MessageKind};

    use super::*;
    use crate::testing::contact_for;

    fn codec(identity: &Identity) -> EnvelopeCodec {
        EnvelopeCodec::new(Arc::new(identity.clone()))
    }

    fn message(text: &str) -> Event {
        Event::new(EventPayload::Message(ChatMessage {
            text: text.to_string(),
            msg_uuid: "m-1".to_string(),
            kind: MessageKind::Text,
        }))
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let alice = Identity::generate();
        let bob = Identity::generate();

        let mut event = message("hello bob");
        let sealed = codec(&alice)
            .seal(&mut event, &bob.public_key_armored())
            .unwrap();
        assert!(event.id.is_some());
        assert!(std::str::from_utf8(&sealed)
            .unwrap()
            .starts_with("-----BEGIN MURMUR MESSAGE-----"));

        let contacts = vec![contact_for(&Identity::generate(), ""), contact_for(&alice, "")];
        let unsealed = codec(&bob).unseal(&sealed, &contacts).unwrap();

        assert_eq!(unsealed.sender, Some(alice.key_id()));
        assert_eq!(unsealed.events.len(), 1);
        let got = &unsealed.events[0];
        assert_eq!(got.id, event.id);
        assert_eq!(got.payload, event.payload);
        assert_eq!(got.sender, Some(alice.key_id()));
    }

    #[test]
    fn test_handshake_stays_plaintext() {
        let alice = Identity::generate();
        let mut event = Event::new(EventPayload::Introduce(Introduce {
            public_key: alice.public_key_armored(),
            endpoint: Endpoint::parse("i2p://alice.b32.i2p/alice").unwrap(),
            username: "alice".to_string(),
        }));
        let sealed = codec(&alice).seal(&mut event, "unused").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&sealed).unwrap();
        assert_eq!(value["type"], "introduce");

        let unsealed = codec(&Identity::generate()).unseal(&sealed, &[]).unwrap();
        assert_eq!(unsealed.events.len(), 1);
        assert!(unsealed.sender.is_none());
        assert!(unsealed.events[0].sender.is_none());
    }

    #[test]
    fn test_plaintext_batch() {
        let alice = Identity::generate();
        let c = codec(&alice);
        let mut a = message("one");
        let mut b = message("two");
        let batch = format!(
            "[{},{}]",
            String::from_utf8(c.encode_plain(&mut a).unwrap()).unwrap(),
            String::from_utf8(c.encode_plain(&mut b).unwrap()).unwrap()
        );
        let unsealed = c.unseal(batch.as_bytes(), &[]).unwrap();
        assert_eq!(unsealed.events.len(), 2);
    }

    #[test]
    fn test_unknown_signer_is_rejected() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let sealed = codec(&alice)
            .seal(&mut message("hi"), &bob.public_key_armored())
            .unwrap();

        let err = codec(&bob).unseal(&sealed, &[]).unwrap_err();
        assert!(matches!(err, CoreError::Crypto(CryptoError::VerificationFailed)));
    }

    #[test]
    fn test_garbage_and_empty_input() {
        let bob = Identity::generate();
        assert!(codec(&bob).unseal(b"not an envelope", &[]).is_err());
        let empty = codec(&bob).unseal(b"", &[]).unwrap();
        assert!(empty.events.is_empty());
    }

    #[test]
    fn test_resolve_sender_picks_matching_contact() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let sealed = codec(&alice)
            .seal(&mut message("hi"), &bob.public_key_armored())
            .unwrap();
        let armored = String::from_utf8(sealed).unwrap();

        let contacts = vec![contact_for(&Identity::generate(), ""), contact_for(&alice, "")];
        assert_eq!(
            codec(&bob).resolve_sender(&armored, &contacts),
            Some(alice.key_id())
        );
        assert_eq!(codec(&bob).resolve_sender(&armored, &contacts[..1]), None);
    }
}
