//! A running murmur node: identity, store and the three engines.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use murmur_shared::{CryptoAdapter, Endpoint, Identity, KeyId, MessageKind, MurmurError};
use murmur_store::{Database, FileStoreElement, LocalIdentity, Message, QueuedEvent, UserInfo};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::callbacks::Callbacks;
use crate::codec::EnvelopeCodec;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{CoreError, Result};
use crate::filesync::FileSync;
use crate::outbox::Outbox;
use crate::profile::{self, DiscoveredProfile, LocalProfile};
use crate::relay::RelayEngine;
use crate::transport::Transport;

pub struct Node {
    config: EngineConfig,
    store_dir: PathBuf,
    db: Arc<Database>,
    key_id: KeyId,
    profile: Arc<RwLock<LocalProfile>>,
    codec: Arc<EnvelopeCodec>,
    transport: Arc<dyn Transport>,
    outbox: Outbox,
    relay: RelayEngine,
    files: FileSync,
    dispatcher: Dispatcher,
    callbacks: Callbacks,
}

impl Node {
    /// Open the store, load or create the local identity and wire the engines.
    /// Nothing runs until [`Node::start`].
    pub fn open(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let store_dir = match &config.store_dir {
            Some(dir) => dir.clone(),
            None => Database::default_dir(&config.account)?,
        };
        std::fs::create_dir_all(&store_dir)?;
        let db = Arc::new(Database::open_at(&store_dir.join("murmur.db"))?);

        let (identity, local) = load_or_create_identity(&db, &config)?;
        let key_id = identity.key_id();
        let crypto: Arc<dyn CryptoAdapter> = Arc::new(identity);
        let codec = Arc::new(EnvelopeCodec::new(crypto.clone()));
        let profile = Arc::new(RwLock::new(LocalProfile {
            username: local.username,
            bio: local.bio,
            endpoint: local.endpoint,
        }));

        let repaired = repair_key_ids(&db, crypto.as_ref())?;
        if repaired > 0 {
            tracing::info!(count = repaired, "Repaired contact key ids");
        }

        let callbacks = Callbacks::new();
        let outbox = Outbox::new(db.clone(), codec.clone(), profile.clone());
        let relay = RelayEngine::new(
            db.clone(),
            transport.clone(),
            config.relay_batch_size,
            config.relay_interval,
        );
        let files = FileSync::new(
            db.clone(),
            transport.clone(),
            outbox.clone(),
            callbacks.clone(),
            config.files_dir(&store_dir),
            &config,
        );
        let dispatcher = Dispatcher::new(
            db.clone(),
            crypto,
            outbox.clone(),
            files.clone(),
            callbacks.clone(),
            config.mini,
        );

        tracing::info!(
            account = %config.account,
            key_id = %key_id,
            store = %store_dir.display(),
            mini = config.mini,
            "Node opened"
        );

        Ok(Self {
            config,
            store_dir,
            db,
            key_id,
            profile,
            codec,
            transport,
            outbox,
            relay,
            files,
            dispatcher,
            callbacks,
        })
    }

    /// Spawn the relay, scan and download loops. In mini mode nothing is
    /// spawned and the host drives the engines itself.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if self.config.mini {
            tracing::info!("Mini mode, background workers not started");
            return Vec::new();
        }
        vec![
            tokio::spawn(self.relay.clone().run()),
            tokio::spawn(self.files.clone().run_scan_loop()),
            tokio::spawn(self.files.clone().run_download_loop()),
        ]
    }

    /// Handle an inbound payload. Returns how many events were applied.
    pub async fn receive(&self, bytes: &[u8]) -> Result<usize> {
        let contacts = self.db.list_users()?;
        let unsealed = self.codec.unseal(bytes, &contacts)?;
        Ok(self.dispatcher.dispatch(unsealed.events).await)
    }

    pub fn account(&self) -> &str {
        &self.config.account
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub fn relay(&self) -> &RelayEngine {
        &self.relay
    }

    pub fn files(&self) -> &FileSync {
        &self.files
    }

    pub fn public_key(&self) -> String {
        self.codec.crypto().public_key_armored()
    }

    pub fn profile(&self) -> LocalProfile {
        self.profile
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// The profile served to peers that discover this node.
    pub fn discovery_profile(&self) -> DiscoveredProfile {
        let profile = self.profile();
        DiscoveredProfile {
            name: profile.username,
            bio: profile.bio,
            publickey: self.public_key(),
            endpoint: profile.endpoint,
        }
    }

    pub fn update_profile(&self, username: &str, bio: &str, endpoint: Endpoint) -> Result<()> {
        self.db.update_local_profile(username, bio, &endpoint)?;
        let mut profile = self.profile.write().unwrap_or_else(|p| p.into_inner());
        *profile = LocalProfile {
            username: username.to_string(),
            bio: bio.to_string(),
            endpoint,
        };
        Ok(())
    }

    pub fn contacts(&self) -> Result<Vec<UserInfo>> {
        Ok(self.db.list_users()?)
    }

    pub fn contact(&self, key_id: &KeyId) -> Result<UserInfo> {
        Ok(self.db.get_user_by_key_id(key_id)?)
    }

    /// Add or update a contact from its armored public key, optionally
    /// sending it our introduction.
    pub fn add_contact(
        &self,
        public_key: &str,
        username: &str,
        endpoint: Endpoint,
        introduce: bool,
    ) -> Result<UserInfo> {
        let crypto = self.codec.crypto();
        let fingerprint = crypto.fingerprint(public_key)?;
        let key_id = KeyId::new(&fingerprint);
        if key_id == self.key_id {
            return Err(CoreError::InvalidInput("cannot add own key as contact".to_string()));
        }

        let mut user = match self.db.get_user_by_fingerprint(&fingerprint) {
            Ok(user) => user,
            Err(murmur_store::StoreError::NotFound) => UserInfo {
                id: 0,
                username: String::new(),
                public_key: public_key.to_string(),
                fingerprint,
                key_id,
                endpoint: Endpoint::none(),
                created_at: Utc::now(),
            },
            Err(e) => return Err(e.into()),
        };
        if !username.is_empty() {
            user.username = username.to_string();
        }
        if !endpoint.is_empty() {
            user.endpoint = endpoint;
        }
        let user = self.db.upsert_user(&user)?;
        tracing::info!(key_id = %user.key_id, endpoint = %user.endpoint, "Contact saved");

        if introduce {
            self.outbox.send_introduce(&user)?;
        }
        Ok(user)
    }

    /// Ask the node at `endpoint` to introduce itself.
    pub fn request_introduction(&self, endpoint: &Endpoint) -> Result<QueuedEvent> {
        self.outbox.request_introduction(endpoint)
    }

    pub async fn discover(&self, endpoint: &Endpoint) -> Result<DiscoveredProfile> {
        profile::discover(self.transport.as_ref(), endpoint).await
    }

    /// Discover the peer at `endpoint`, save it and introduce ourselves.
    pub async fn add_discovered(&self, endpoint: &Endpoint) -> Result<UserInfo> {
        let found = self.discover(endpoint).await?;
        self.add_contact(&found.publickey, &found.name, found.endpoint, true)
    }

    /// Remove a contact with its history, pending deliveries and files.
    pub async fn purge_contact(&self, key_id: &KeyId) -> Result<bool> {
        let user = self.db.get_user_by_key_id(key_id)?;
        for element in self.files.list(key_id, true)? {
            self.db.delete_file_element(element.id)?;
        }
        let dir = self.config.files_dir(&self.store_dir).join(key_id.as_str());
        match tokio::fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        let removed = self.db.purge_user(&user)?;
        tracing::info!(key_id = %key_id, "Contact purged");
        Ok(removed)
    }

    pub fn send_message(&self, key_id: &KeyId, text: &str) -> Result<Message> {
        self.send_message_kind(key_id, text, MessageKind::Text)
    }

    pub fn send_message_kind(&self, key_id: &KeyId, text: &str, kind: MessageKind) -> Result<Message> {
        let user = self.db.get_user_by_key_id(key_id)?;
        self.outbox.send_message(&user, text, kind)
    }

    pub fn messages(&self, key_id: &KeyId, limit: u32, offset: u32) -> Result<Vec<Message>> {
        Ok(self.db.get_messages_for_key_id(key_id, limit, offset)?)
    }

    pub async fn put_file(
        &self,
        owner: &KeyId,
        uuid: Option<Uuid>,
        path: &str,
        source: Option<&Path>,
    ) -> Result<FileStoreElement> {
        self.files.put_local(owner, uuid, path, source, None).await
    }

    pub async fn delete_file(&self, owner: &KeyId, uuid: Uuid) -> Result<FileStoreElement> {
        self.files.mark_deleted(owner, uuid).await
    }

    pub fn list_files(&self, owner: &KeyId) -> Result<Vec<FileStoreElement>> {
        self.files.list(owner, false)
    }

    /// Local path of shared content named by an ingress locator.
    pub fn serve_file(&self, owner: &KeyId, uuid: Uuid, hash: &str) -> Result<Option<PathBuf>> {
        self.files.serve_path(owner, uuid, hash)
    }
}

fn load_or_create_identity(db: &Database, config: &EngineConfig) -> Result<(Identity, LocalIdentity)> {
    if let Some(mut local) = db.load_local_identity()? {
        let identity =
            Identity::from_secret_hex(&local.secret_key_hex).map_err(MurmurError::from)?;
        if !config.endpoint.is_empty() && config.endpoint != local.endpoint {
            db.update_local_profile(&local.username, &local.bio, &config.endpoint)?;
            local.endpoint = config.endpoint.clone();
        }
        return Ok((identity, local));
    }

    let identity = Identity::generate();
    let local = LocalIdentity {
        secret_key_hex: identity.secret_hex(),
        username: config.username.clone(),
        bio: String::new(),
        endpoint: config.endpoint.clone(),
        created_at: Utc::now(),
    };
    db.save_local_identity(&local)?;
    tracing::info!(key_id = %identity.key_id(), "Generated new identity");
    Ok((identity, local))
}

/// Recompute every contact's key id from its public key and fix stale rows.
fn repair_key_ids(db: &Database, crypto: &dyn CryptoAdapter) -> Result<usize> {
    let mut repaired = 0;
    for user in db.list_users()? {
        let key_id = match crypto.key_id(&user.public_key) {
            Ok(key_id) => key_id,
            Err(e) => {
                tracing::warn!(id = user.id, error = %e, "Contact has an unreadable public key");
                continue;
            }
        };
        if key_id != user.key_id && db.update_user_key_id(user.id, &key_id)? {
            repaired += 1;
        }
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testing::{contact_for, MockTransport};

    fn config(dir: &Path, account: &str, endpoint: &str) -> EngineConfig {
        let mut config = EngineConfig::with_store_dir(dir.join(account));
        config.account = account.to_string();
        config.username = account.to_string();
        config.endpoint = Endpoint::parse(endpoint).unwrap();
        config
    }

    fn open(dir: &Path, account: &str) -> (Node, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let endpoint = format!("i2p://{account}.b32.i2p/{account}");
        let node = Node::open(config(dir, account, &endpoint), transport.clone()).unwrap();
        (node, transport)
    }

    #[tokio::test]
    async fn test_identity_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = open(dir.path(), "alice");
        let key_id = first.key_id().clone();
        drop(first);

        let (second, _) = open(dir.path(), "alice");
        assert_eq!(second.key_id(), &key_id);
        assert_eq!(second.profile().username, "alice");
    }

    #[tokio::test]
    async fn test_mini_mode_starts_no_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "alice", "i2p://alice.b32.i2p/alice");
        config.mini = true;
        let node = Node::open(config, MockTransport::new()).unwrap();
        assert!(node.start().is_empty());
    }

    #[tokio::test]
    async fn test_add_contact_rejects_own_key() {
        let dir = tempfile::tempdir().unwrap();
        let (node, _) = open(dir.path(), "alice");
        let own = node.public_key();
        assert!(matches!(
            node.add_contact(&own, "", Endpoint::none(), false),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_message_between_two_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let (alice, alice_net) = open(dir.path(), "alice");
        let (bob, _) = open(dir.path(), "bob");

        let received = Arc::new(AtomicUsize::new(0));
        let r = received.clone();
        bob.callbacks().on_message(move |_, _, msg| {
            assert_eq!(msg.body, "hello bob");
            r.fetch_add(1, Ordering::SeqCst);
        });

        let bob_contact = alice
            .add_contact(&bob.public_key(), "bob", bob.profile().endpoint, true)
            .unwrap();
        alice.send_message(&bob_contact.key_id, "hello bob").unwrap();

        while alice.db().count_queued_events().unwrap() > 0 {
            alice.relay().drain_once().unwrap().settle().await;
        }
        let mut posts = alice_net.posted();
        assert_eq!(posts.len(), 2);
        // Bob can only verify the message once he knows alice's key.
        posts.sort_by_key(|(_, body)| body.first() != Some(&b'{'));
        for (_, body) in posts {
            assert_eq!(bob.receive(&body).await.unwrap(), 1);
        }

        let alice_at_bob = bob.contact(alice.key_id()).unwrap();
        assert_eq!(alice_at_bob.username, "alice");
        assert_eq!(received.load(Ordering::SeqCst), 1);
        let history = bob.messages(alice.key_id(), 10, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].incoming);
    }

    #[tokio::test]
    async fn test_discovery_profile_and_add_discovered() {
        let dir = tempfile::tempdir().unwrap();
        let (alice, alice_net) = open(dir.path(), "alice");
        let (bob, _) = open(dir.path(), "bob");

        let served = serde_json::to_vec(&bob.discovery_profile()).unwrap();
        *alice_net.fetch_body.lock().unwrap() = Some(served);

        let user = alice.add_discovered(&bob.profile().endpoint).await.unwrap();
        assert_eq!(&user.key_id, bob.key_id());
        assert_eq!(user.username, "bob");
        assert_eq!(alice.db().count_queued_events().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_contact_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (alice, _) = open(dir.path(), "alice");
        let bob = Identity::generate();
        let contact = contact_for(&bob, "i2p://bob.b32.i2p/bob");
        let contact = alice
            .add_contact(&contact.public_key, "bob", contact.endpoint, false)
            .unwrap();
        alice.send_message(&contact.key_id, "hi").unwrap();
        alice.put_file(&contact.key_id, None, "/a", None).await.unwrap();

        assert!(alice.purge_contact(&contact.key_id).await.unwrap());
        assert!(alice.contacts().unwrap().is_empty());
        assert!(alice.messages(&contact.key_id, 10, 0).unwrap().is_empty());
        assert_eq!(alice.db().count_queued_events().unwrap(), 0);
        assert!(alice.files().list(&contact.key_id, true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_profile_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (alice, _) = open(dir.path(), "alice");
            let endpoint = alice.profile().endpoint;
            alice.update_profile("Alice", "hello there", endpoint).unwrap();
            assert_eq!(alice.discovery_profile().name, "Alice");
        }
        let (alice, _) = open(dir.path(), "alice");
        let profile = alice.profile();
        assert_eq!(profile.username, "Alice");
        assert_eq!(profile.bio, "hello there");
    }

    #[tokio::test]
    async fn test_file_put_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (alice, _) = open(dir.path(), "alice");
        let bob = contact_for(&Identity::generate(), "i2p://bob.b32.i2p/bob");
        let bob = alice
            .add_contact(&bob.public_key, "bob", bob.endpoint, false)
            .unwrap();

        let element = alice.put_file(&bob.key_id, None, "/notes", None).await.unwrap();
        assert_eq!(alice.list_files(&bob.key_id).unwrap().len(), 1);

        let deleted = alice.delete_file(&bob.key_id, element.uuid).await.unwrap();
        assert!(deleted.is_deleted);
        assert!(alice.list_files(&bob.key_id).unwrap().is_empty());
        // creation and deletion were both announced
        assert_eq!(alice.db().count_queued_events().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_key_id_is_repaired_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let bob = Identity::generate();
        {
            let (alice, _) = open(dir.path(), "alice");
            let contact = alice
                .add_contact(&bob.public_key_armored(), "bob", Endpoint::none(), false)
                .unwrap();
            alice
                .db()
                .update_user_key_id(contact.id, &KeyId::new("ffffffffffffffff"))
                .unwrap();
        }
        let (alice, _) = open(dir.path(), "alice");
        assert!(alice.contact(&bob.key_id()).is_ok());
    }
}
