use murmur_shared::Endpoint;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::transport::Transport;

/// What this node says about itself in introductions and discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalProfile {
    pub username: String,
    pub bio: String,
    pub endpoint: Endpoint,
}

/// Public profile served on `GET /<account>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: String,
    pub publickey: String,
    #[serde(default)]
    pub endpoint: Endpoint,
}

/// Fetch the public profile a peer serves at `endpoint`.
pub async fn discover(transport: &dyn Transport, endpoint: &Endpoint) -> Result<DiscoveredProfile> {
    let body = transport.fetch(endpoint).await?;
    let mut profile: DiscoveredProfile = serde_json::from_slice(&body)
        .map_err(|e| CoreError::InvalidInput(format!("malformed profile: {e}")))?;
    if profile.endpoint.is_empty() {
        profile.endpoint = endpoint.clone();
    }
    tracing::debug!(endpoint = %endpoint, name = %profile.name, "Discovered profile");
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    #[tokio::test]
    async fn test_discover_parses_profile() {
        let transport = MockTransport::new();
        *transport.fetch_body.lock().unwrap() =
            Some(br#"{"name":"bob","bio":"hi","publickey":"PK","endpoint":""}"#.to_vec());

        let endpoint = Endpoint::parse("i2p://bob.b32.i2p/bob").unwrap();
        let profile = discover(transport.as_ref(), &endpoint).await.unwrap();
        assert_eq!(profile.name, "bob");
        assert_eq!(profile.publickey, "PK");
        assert_eq!(profile.endpoint, endpoint);
    }

    #[tokio::test]
    async fn test_discover_rejects_garbage() {
        let transport = MockTransport::new();
        *transport.fetch_body.lock().unwrap() = Some(b"<html>".to_vec());
        let endpoint = Endpoint::parse("i2p://bob.b32.i2p/bob").unwrap();
        assert!(matches!(
            discover(transport.as_ref(), &endpoint).await,
            Err(CoreError::InvalidInput(_))
        ));
    }
}
