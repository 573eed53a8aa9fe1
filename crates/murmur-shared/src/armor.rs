//! ASCII armor for keys and sealed envelopes.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::CryptoError;

const LINE_WIDTH: usize = 64;

pub fn armor(label: &str, bytes: &[u8]) -> String {
    let body = STANDARD.encode(bytes);
    let mut out = format!("-----BEGIN {label}-----\n");
    for chunk in body.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

pub fn dearmor(label: &str, text: &str) -> Result<Vec<u8>, CryptoError> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let text = text.trim();
    let inner = text
        .strip_prefix(&begin)
        .and_then(|rest| rest.strip_suffix(&end))
        .ok_or_else(|| CryptoError::MalformedArmor(format!("expected {label} block")))?;

    let body: String = inner.split_whitespace().collect();
    STANDARD
        .decode(body)
        .map_err(|e| CryptoError::MalformedArmor(e.to_string()))
}

/// Cheap check used to decide whether inbound bytes may be an armored block.
pub fn looks_armored(label: &str, text: &str) -> bool {
    text.trim_start().starts_with(&format!("-----BEGIN {label}-----"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_armor_roundtrip() {
        let data = vec![7u8; 200];
        let text = armor("TEST BLOCK", &data);
        assert!(text.lines().all(|l| l.len() <= LINE_WIDTH || l.starts_with("-----")));
        assert_eq!(dearmor("TEST BLOCK", &text).unwrap(), data);
    }

    #[test]
    fn test_wrong_label_fails() {
        let text = armor("A", b"x");
        assert!(dearmor("B", &text).is_err());
        assert!(looks_armored("A", &text));
        assert!(!looks_armored("B", &text));
    }
}
