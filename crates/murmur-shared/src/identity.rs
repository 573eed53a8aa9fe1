use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey as AgreementPublicKey, StaticSecret};

use crate::armor;
use crate::constants::{
    ARMOR_MESSAGE, ARMOR_PUBLIC_KEY, FINGERPRINT_SIZE, KDF_CONTEXT_AGREEMENT_KEY,
    KDF_CONTEXT_ENVELOPE_KEY, NONCE_SIZE, PUBKEY_SIZE, SIGNATURE_SIZE,
};
use crate::crypto::{self, CryptoAdapter};
use crate::error::{CryptoError, IdentityError};
use crate::types::KeyId;

/// A node's long-term identity.
///
/// Ed25519 signs envelopes; an X25519 key derived from the same secret
/// receives them. Only the 32-byte Ed25519 secret needs to be persisted.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    agreement_key: StaticSecret,
}

/// The public half of an [`Identity`], as exchanged between peers.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicKeyBundle {
    pub signing: VerifyingKey,
    pub agreement: AgreementPublicKey,
}

impl PublicKeyBundle {
    pub fn to_bytes(&self) -> [u8; PUBKEY_SIZE * 2] {
        let mut out = [0u8; PUBKEY_SIZE * 2];
        out[..PUBKEY_SIZE].copy_from_slice(self.signing.as_bytes());
        out[PUBKEY_SIZE..].copy_from_slice(self.agreement.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBKEY_SIZE * 2 {
            return Err(CryptoError::InvalidKeyLength);
        }
        let mut signing = [0u8; PUBKEY_SIZE];
        signing.copy_from_slice(&bytes[..PUBKEY_SIZE]);
        let mut agreement = [0u8; PUBKEY_SIZE];
        agreement.copy_from_slice(&bytes[PUBKEY_SIZE..]);

        Ok(Self {
            signing: VerifyingKey::from_bytes(&signing)
                .map_err(|_| CryptoError::InvalidPublicKey)?,
            agreement: AgreementPublicKey::from(agreement),
        })
    }

    pub fn to_armored(&self) -> String {
        armor::armor(ARMOR_PUBLIC_KEY, &self.to_bytes())
    }

    pub fn from_armored(text: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&armor::dearmor(ARMOR_PUBLIC_KEY, text)?)
    }

    /// Lower-hex BLAKE3 digest of the key bundle, truncated to 20 bytes.
    pub fn fingerprint(&self) -> String {
        let digest = blake3::hash(&self.to_bytes());
        hex::encode(&digest.as_bytes()[..FINGERPRINT_SIZE])
    }

    pub fn key_id(&self) -> KeyId {
        KeyId::new(&self.fingerprint())
    }
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    /// Restore identity from a hex-encoded secret, as persisted by the store.
    pub fn from_secret_hex(secret: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(secret.trim()).map_err(|e| IdentityError::KeyFile(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::InvalidKeyBytes)?;
        Ok(Self::from_secret_bytes(&secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let derived = crypto::derive_key(KDF_CONTEXT_AGREEMENT_KEY, &[&signing_key.as_bytes()[..]]);
        Self {
            signing_key,
            agreement_key: StaticSecret::from(derived),
        }
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.as_bytes())
    }

    pub fn public_bundle(&self) -> PublicKeyBundle {
        PublicKeyBundle {
            signing: self.signing_key.verifying_key(),
            agreement: AgreementPublicKey::from(&self.agreement_key),
        }
    }

    pub fn fingerprint(&self) -> String {
        self.public_bundle().fingerprint()
    }

    pub fn key_id(&self) -> KeyId {
        self.public_bundle().key_id()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Produce `eph_pub || nonce || XChaCha20-Poly1305(signature || payload)`.
    ///
    /// The signature covers the recipient's agreement key followed by the
    /// payload, so a sealed blob cannot be re-addressed to someone else.
    pub fn seal_for(
        &self,
        recipient: &PublicKeyBundle,
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = AgreementPublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&recipient.agreement);
        let key = crypto::derive_key(
            KDF_CONTEXT_ENVELOPE_KEY,
            &[
                &shared.as_bytes()[..],
                &ephemeral_public.as_bytes()[..],
                &recipient.agreement.as_bytes()[..],
            ],
        );

        let mut signed = Vec::with_capacity(PUBKEY_SIZE + payload.len());
        signed.extend_from_slice(recipient.agreement.as_bytes());
        signed.extend_from_slice(payload);
        let signature = self.sign(&signed);

        let mut inner = Vec::with_capacity(SIGNATURE_SIZE + payload.len());
        inner.extend_from_slice(&signature.to_bytes());
        inner.extend_from_slice(payload);

        let ciphertext = crypto::encrypt(&key, &inner)?;
        let mut out = Vec::with_capacity(PUBKEY_SIZE + ciphertext.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a blob produced by [`Identity::seal_for`]. Returns the payload and
    /// the index of the keyring entry whose signature verified.
    pub fn open(
        &self,
        data: &[u8],
        keyring: &[PublicKeyBundle],
    ) -> Result<(Vec<u8>, usize), CryptoError> {
        if data.len() < PUBKEY_SIZE + NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let (ephemeral, ciphertext) = data.split_at(PUBKEY_SIZE);
        let ephemeral: [u8; PUBKEY_SIZE] = ephemeral
            .try_into()
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let ephemeral_public = AgreementPublicKey::from(ephemeral);
        let own_public = AgreementPublicKey::from(&self.agreement_key);

        let shared = self.agreement_key.diffie_hellman(&ephemeral_public);
        let key = crypto::derive_key(
            KDF_CONTEXT_ENVELOPE_KEY,
            &[&shared.as_bytes()[..], &ephemeral[..], &own_public.as_bytes()[..]],
        );

        let inner = crypto::decrypt(&key, ciphertext)?;
        if inner.len() < SIGNATURE_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let (signature, payload) = inner.split_at(SIGNATURE_SIZE);
        let signature: [u8; SIGNATURE_SIZE] = signature
            .try_into()
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let signature = Signature::from_bytes(&signature);

        let mut signed = Vec::with_capacity(PUBKEY_SIZE + payload.len());
        signed.extend_from_slice(own_public.as_bytes());
        signed.extend_from_slice(payload);

        keyring
            .iter()
            .position(|candidate| candidate.signing.verify(&signed, &signature).is_ok())
            .map(|idx| (payload.to_vec(), idx))
            .ok_or(CryptoError::VerificationFailed)
    }
}

impl CryptoAdapter for Identity {
    fn public_key_armored(&self) -> String {
        self.public_bundle().to_armored()
    }

    fn encrypt_sign(
        &self,
        recipient_public_key: &str,
        plaintext: &[u8],
    ) -> Result<String, CryptoError> {
        let recipient = PublicKeyBundle::from_armored(recipient_public_key)?;
        let sealed = self.seal_for(&recipient, plaintext)?;
        Ok(armor::armor(ARMOR_MESSAGE, &sealed))
    }

    fn decrypt(&self, armored: &str, verify_keyring: &[String]) -> Result<Vec<u8>, CryptoError> {
        let sealed = armor::dearmor(ARMOR_MESSAGE, armored)?;
        // Unparseable keyring entries cannot verify anything; skip them.
        let keyring: Vec<PublicKeyBundle> = verify_keyring
            .iter()
            .filter_map(|pk| PublicKeyBundle::from_armored(pk).ok())
            .collect();
        self.open(&sealed, &keyring).map(|(payload, _)| payload)
    }

    fn fingerprint(&self, public_key: &str) -> Result<String, CryptoError> {
        Ok(PublicKeyBundle::from_armored(public_key)?.fingerprint())
    }
}

/// Verify a signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::InvalidKeyBytes)
}
