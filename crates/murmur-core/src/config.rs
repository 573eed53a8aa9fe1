//! Engine configuration loaded from environment variables.
//!
//! All settings have defaults so a node can start with zero configuration
//! for local development.

use std::path::PathBuf;
use std::time::Duration;

use murmur_shared::constants::{DEFAULT_I2P_PROXY, DEFAULT_TOR_PROXY, INLINE_FILE_THRESHOLD};
use murmur_shared::Endpoint;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the database and the file store.
    /// Env: `MURMUR_STORE_DIR`
    /// Default: platform data directory for the account.
    pub store_dir: Option<PathBuf>,

    /// Account name; also the first path segment of this node's endpoint.
    /// Env: `MURMUR_ACCOUNT`
    /// Default: `default`
    pub account: String,

    /// Display name announced to peers on first start.
    /// Env: `MURMUR_USERNAME`
    pub username: String,

    /// Endpoint announced to peers.
    /// Env: `MURMUR_ENDPOINT`
    /// Default: empty (peers cannot reach this node until set).
    pub endpoint: Endpoint,

    /// HTTP proxy for `i2p://` endpoints.
    /// Env: `MURMUR_I2P_PROXY`
    /// Default: `http://127.0.0.1:4444`
    pub i2p_proxy: String,

    /// SOCKS proxy for `tor://` endpoints.
    /// Env: `MURMUR_TOR_PROXY`
    /// Default: `socks5h://127.0.0.1:9050`
    pub tor_proxy: String,

    /// Relay loop period; one backoff tick per period.
    pub relay_interval: Duration,

    /// Change-detection loop period.
    pub scan_interval: Duration,

    /// Download loop period.
    pub download_interval: Duration,

    /// Timeout of one outbound delivery.
    pub relay_timeout: Duration,

    /// Timeout of a profile discovery request.
    pub discovery_timeout: Duration,

    /// Longest silence tolerated from a peer while a file streams in.
    pub download_idle_timeout: Duration,

    /// Upper bound on a single download attempt, however steady the stream.
    pub download_attempt_timeout: Duration,

    /// Maximum queued events considered per relay cycle.
    pub relay_batch_size: u32,

    /// Download attempts before a remote file object is abandoned.
    pub max_download_attempts: u32,

    /// Files up to this size are sent inline with their announcement.
    pub inline_file_threshold: u64,

    /// When set, no background workers are started; the host drives
    /// `drain_once`, `scan_once` and `trigger_downloads` itself.
    /// Env: `MURMUR_MINI` (true/false)
    pub mini: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            account: "default".to_string(),
            username: String::new(),
            endpoint: Endpoint::none(),
            i2p_proxy: DEFAULT_I2P_PROXY.to_string(),
            tor_proxy: DEFAULT_TOR_PROXY.to_string(),
            relay_interval: Duration::from_secs(1),
            scan_interval: Duration::from_secs(5),
            download_interval: Duration::from_secs(5),
            relay_timeout: Duration::from_secs(60),
            discovery_timeout: Duration::from_secs(14),
            download_idle_timeout: Duration::from_secs(60),
            download_attempt_timeout: Duration::from_secs(3600),
            relay_batch_size: 50,
            max_download_attempts: 15,
            inline_file_threshold: INLINE_FILE_THRESHOLD,
            mini: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("MURMUR_STORE_DIR") {
            if !dir.is_empty() {
                config.store_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(account) = std::env::var("MURMUR_ACCOUNT") {
            if is_valid_account(&account) {
                config.account = account;
            } else {
                tracing::warn!(value = %account, "Invalid MURMUR_ACCOUNT, using default");
            }
        }

        if let Ok(name) = std::env::var("MURMUR_USERNAME") {
            config.username = name;
        }

        if let Ok(raw) = std::env::var("MURMUR_ENDPOINT") {
            match Endpoint::parse(&raw) {
                Ok(endpoint) => config.endpoint = endpoint,
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "Invalid MURMUR_ENDPOINT, ignoring");
                }
            }
        }

        if let Ok(proxy) = std::env::var("MURMUR_I2P_PROXY") {
            config.i2p_proxy = proxy;
        }

        if let Ok(proxy) = std::env::var("MURMUR_TOR_PROXY") {
            config.tor_proxy = proxy;
        }

        if let Ok(val) = std::env::var("MURMUR_MINI") {
            config.mini = val == "true" || val == "1";
        }

        config
    }

    /// Configuration rooted at an explicit store directory.
    pub fn with_store_dir(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: Some(store_dir.into()),
            ..Self::default()
        }
    }

    pub fn files_dir(&self, store_dir: &std::path::Path) -> PathBuf {
        store_dir.join("files")
    }
}

/// Account names become URL path segments and directory names.
fn is_valid_account(account: &str) -> bool {
    !account.is_empty()
        && account
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.i2p_proxy, "http://127.0.0.1:4444");
        assert_eq!(config.relay_batch_size, 50);
        assert_eq!(config.max_download_attempts, 15);
        assert_eq!(config.relay_timeout, Duration::from_secs(60));
        assert_eq!(config.discovery_timeout, Duration::from_secs(14));
        assert!(!config.mini);
    }

    #[test]
    fn test_account_validation() {
        assert!(is_valid_account("alice_01"));
        assert!(!is_valid_account(""));
        assert!(!is_valid_account("a/b"));
    }

    #[test]
    fn test_with_store_dir() {
        let config = EngineConfig::with_store_dir("/tmp/x");
        assert_eq!(config.store_dir, Some(PathBuf::from("/tmp/x")));
        assert_eq!(config.files_dir(std::path::Path::new("/tmp/x")), PathBuf::from("/tmp/x/files"));
    }
}
