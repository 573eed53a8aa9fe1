use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::NONCE_SIZE;
use crate::error::CryptoError;
use crate::types::KeyId;

pub type SymmetricKey = [u8; 32];

/// Public-key operations the engine needs from its crypto provider.
///
/// Keys cross this boundary in armored text form so the store and the wire
/// never have to know the concrete key type.
pub trait CryptoAdapter: Send + Sync {
    /// Armored public key of the local identity.
    fn public_key_armored(&self) -> String;

    /// Encrypt `plaintext` for the recipient and sign it with the local key.
    fn encrypt_sign(
        &self,
        recipient_public_key: &str,
        plaintext: &[u8],
    ) -> Result<String, CryptoError>;

    /// Decrypt with the local key and verify the signature against any key in
    /// `verify_keyring`.
    fn decrypt(&self, armored: &str, verify_keyring: &[String]) -> Result<Vec<u8>, CryptoError>;

    /// Lower-hex fingerprint of an armored public key.
    fn fingerprint(&self, public_key: &str) -> Result<String, CryptoError>;

    fn key_id(&self, public_key: &str) -> Result<KeyId, CryptoError> {
        Ok(KeyId::new(&self.fingerprint(public_key)?))
    }
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// BLAKE3 KDF with domain separation
pub fn derive_key(context: &str, parts: &[&[u8]]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
