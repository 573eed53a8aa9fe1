//! Test doubles shared by the engine's unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use murmur_shared::{CryptoAdapter, Endpoint, Identity};
use murmur_store::{Database, UserInfo};
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::transport::Transport;

/// Contact record for `identity`, as it would be stored after an introduction.
pub fn contact_for(identity: &Identity, endpoint: &str) -> UserInfo {
    UserInfo {
        id: 0,
        username: String::new(),
        public_key: identity.public_key_armored(),
        fingerprint: identity.fingerprint(),
        key_id: identity.key_id(),
        endpoint: Endpoint::parse(endpoint).unwrap(),
        created_at: Utc::now(),
    }
}

pub fn temp_db() -> (tempfile::TempDir, Arc<Database>) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(&dir.path().join("murmur.db")).unwrap();
    (dir, Arc::new(db))
}

/// In-memory [`Transport`] that records traffic instead of touching the network.
#[derive(Default)]
pub struct MockTransport {
    pub posts: Mutex<Vec<(Endpoint, Vec<u8>)>>,
    pub fail_posts: AtomicBool,
    pub downloads: AtomicUsize,
    /// Content served by `download`; `None` makes every download fail.
    pub download_content: Mutex<Option<Vec<u8>>>,
    /// When set, `download` waits for a notification before completing.
    pub download_gate: Mutex<Option<Arc<Notify>>>,
    pub fetch_body: Mutex<Option<Vec<u8>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn posted(&self) -> Vec<(Endpoint, Vec<u8>)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn serve(&self, content: &[u8]) {
        *self.download_content.lock().unwrap() = Some(content.to_vec());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, endpoint: &Endpoint, body: Vec<u8>) -> Result<(), TransportError> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(TransportError::Status(502));
        }
        self.posts.lock().unwrap().push((endpoint.clone(), body));
        Ok(())
    }

    async fn fetch(&self, _endpoint: &Endpoint) -> Result<Vec<u8>, TransportError> {
        self.fetch_body
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransportError::Status(404))
    }

    async fn download(&self, _endpoint: &Endpoint, dest: &Path) -> Result<u64, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let gate = self.download_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let content = self.download_content.lock().unwrap().clone();
        match content {
            Some(bytes) => {
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(dest, &bytes).await?;
                Ok(bytes.len() as u64)
            }
            None => Err(TransportError::Status(404)),
        }
    }
}
