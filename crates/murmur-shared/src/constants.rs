/// Application name
pub const APP_NAME: &str = "murmur";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 / X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Number of BLAKE3 output bytes kept for a key fingerprint
pub const FINGERPRINT_SIZE: usize = 20;

/// Key ids are the trailing hex characters of a fingerprint
pub const KEY_ID_LEN: usize = 16;

/// Maximum accepted inbound envelope size in bytes (8 MiB)
pub const MAX_ENVELOPE_SIZE: usize = 8 * 1024 * 1024;

/// Files up to this size travel inline inside their `file` event
pub const INLINE_FILE_THRESHOLD: u64 = 4 * 1024;

/// Default proxies per overlay network
pub const DEFAULT_I2P_PROXY: &str = "http://127.0.0.1:4444";
pub const DEFAULT_TOR_PROXY: &str = "socks5h://127.0.0.1:9050";

/// Default ingress port
pub const DEFAULT_HTTP_PORT: u16 = 3893;

/// Armor labels
pub const ARMOR_PUBLIC_KEY: &str = "MURMUR PUBLIC KEY";
pub const ARMOR_MESSAGE: &str = "MURMUR MESSAGE";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_AGREEMENT_KEY: &str = "murmur-x25519-static-v1";
pub const KDF_CONTEXT_ENVELOPE_KEY: &str = "murmur-envelope-key-v1";
