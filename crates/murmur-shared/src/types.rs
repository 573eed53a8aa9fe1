use serde::{Deserialize, Serialize};

use crate::constants::KEY_ID_LEN;

/// Short identifier of a peer key: the trailing 16 lower-hex characters of
/// its fingerprint.
///
/// Every constructor normalizes, so a `KeyId` built from a full fingerprint
/// (or from an over-long attribution string) compares equal to one built
/// from the already-truncated form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    pub fn new(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        let start = chars.len().saturating_sub(KEY_ID_LEN);
        Self(chars[start..].iter().collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for KeyId {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&str> for KeyId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_id_keeps_last_sixteen() {
        let id = KeyId::new("abcdef0123456789abcdef");
        assert_eq!(id.as_str(), "0123456789abcdef");
    }

    #[test]
    fn test_lowercases() {
        let id = KeyId::new("0123456789ABCDEF");
        assert_eq!(id.as_str(), "0123456789abcdef");
    }

    #[test]
    fn test_short_id_untouched() {
        assert_eq!(KeyId::new("beef").as_str(), "beef");
        assert!(KeyId::new("").is_empty());
    }

    #[test]
    fn test_serde_normalizes() {
        let id: KeyId = serde_json::from_str("\"FFFF0123456789abcdef\"").unwrap();
        assert_eq!(id.as_str(), "0123456789abcdef");
    }
}
