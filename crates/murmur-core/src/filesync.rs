//! Content-addressed file objects shared per contact.
//!
//! Each object lives at `<root>/<owner key id>/<uuid>` and is identified on
//! the wire by `files/<owner>/<uuid>/<hash>`, resolved against the sharing
//! node's endpoint. Local changes are picked up by a periodic size scan and
//! announced; remote announcements schedule a download that is retried a
//! bounded number of times before the object is abandoned.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use murmur_shared::event::FileAnnouncement;
use murmur_shared::{Endpoint, Event, EventPayload, KeyId};
use murmur_store::{Database, FileStoreElement, QueuedEvent, StoreError, UserInfo};
use uuid::Uuid;

use crate::callbacks::Callbacks;
use crate::config::EngineConfig;
use crate::error::{Result, TransportError};
use crate::outbox::Outbox;
use crate::registry::{LockRegistry, Spawned};
use crate::transport::Transport;

struct DownloadClaim {
    _object: OwnedMutexGuard<()>,
    _content: OwnedMutexGuard<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Content fetched and recorded.
    Completed,
    /// Nothing to do, or another task holds the object.
    Skipped,
    /// Attempts exhausted; the object was removed.
    Abandoned,
    /// A local error interrupted the download; it will be retried.
    Failed,
}

/// BLAKE3 digest of empty content.
pub fn empty_digest() -> String {
    blake3::hash(b"").to_hex().to_string()
}

pub fn digest(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Hash a file on disk. A missing file hashes as empty content.
pub fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((empty_digest(), 0)),
        Err(e) => return Err(e),
    };
    let mut hasher = blake3::Hasher::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hasher.finalize().to_hex().to_string(), size))
}

async fn hash_path(path: PathBuf) -> io::Result<(String, u64)> {
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(io::Error::other)?
}

async fn remove_local(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn is_not_found(e: &StoreError) -> bool {
    matches!(e, StoreError::NotFound)
}

#[derive(Clone)]
pub struct FileSync {
    db: Arc<Database>,
    transport: Arc<dyn Transport>,
    outbox: Outbox,
    callbacks: Callbacks,
    locks: LockRegistry,
    root: PathBuf,
    max_attempts: u32,
    attempt_timeout: Duration,
    inline_threshold: u64,
    scan_interval: Duration,
    download_interval: Duration,
}

impl FileSync {
    pub fn new(
        db: Arc<Database>,
        transport: Arc<dyn Transport>,
        outbox: Outbox,
        callbacks: Callbacks,
        root: PathBuf,
        config: &EngineConfig,
    ) -> Self {
        Self {
            db,
            transport,
            outbox,
            callbacks,
            locks: LockRegistry::new(),
            root,
            max_attempts: config.max_download_attempts,
            attempt_timeout: config.download_attempt_timeout,
            inline_threshold: config.inline_file_threshold,
            scan_interval: config.scan_interval,
            download_interval: config.download_interval,
        }
    }

    pub fn local_path(&self, owner: &KeyId, uuid: Uuid) -> PathBuf {
        self.root.join(owner.as_str()).join(uuid.to_string())
    }

    /// Wire locator of an element's current content.
    pub fn locator(element: &FileStoreElement) -> String {
        format!(
            "files/{}/{}/{}",
            element.owner_key_id, element.uuid, element.content_hash
        )
    }

    fn lock_key(element: &FileStoreElement) -> String {
        let raw = format!(
            "{}_{}_{}",
            element.content_hash, element.uuid, element.owner_key_id
        );
        blake3::hash(raw.as_bytes()).to_hex().to_string()
    }

    /// Guards for both the announced content and the object itself. A
    /// re-announced object changes its content key while the old transfer
    /// may still be writing to the same path.
    fn try_claim(&self, element: &FileStoreElement) -> Option<DownloadClaim> {
        let object = self
            .locks
            .try_acquire(&format!("object_{}_{}", element.owner_key_id, element.uuid))?;
        let content = self.locks.try_acquire(&Self::lock_key(element))?;
        Some(DownloadClaim {
            _object: object,
            _content: content,
        })
    }

    fn persist(&self, element: &mut FileStoreElement) -> Result<()> {
        if element.id == 0 {
            element.id = self.db.insert_file_element(element)?;
        } else {
            self.db.save_file_element(element)?;
        }
        Ok(())
    }

    fn blank_element(owner: &KeyId, uuid: Uuid) -> FileStoreElement {
        let now = Utc::now();
        FileStoreElement {
            id: 0,
            owner_key_id: owner.clone(),
            uuid,
            path: String::new(),
            content_hash: empty_digest(),
            size_bytes: 0,
            modify_time: now,
            is_deleted: false,
            is_downloading: false,
            external_http_path: None,
            created_at: now,
        }
    }

    pub fn list(&self, owner: &KeyId, include_deleted: bool) -> Result<Vec<FileStoreElement>> {
        Ok(self.db.list_file_elements(owner, include_deleted)?)
    }

    /// Share a file with `owner`, creating the object or replacing its
    /// content. Without `source` a new object starts out empty. An empty
    /// `path` files it under `/Unsort/`.
    pub async fn put_local(
        &self,
        owner: &KeyId,
        uuid: Option<Uuid>,
        path: &str,
        source: Option<&Path>,
        modify_time: Option<DateTime<Utc>>,
    ) -> Result<FileStoreElement> {
        self.db.get_user_by_key_id(owner)?;

        let uuid = uuid.unwrap_or_else(Uuid::new_v4);
        let mut element = match self.db.get_file_element(owner, uuid) {
            Ok(element) => element,
            Err(e) if is_not_found(&e) => Self::blank_element(owner, uuid),
            Err(e) => return Err(e.into()),
        };
        element.path = if path.is_empty() {
            format!("/Unsort/{}", Utc::now().format("%Y%m%d-%H%M%S"))
        } else {
            path.to_string()
        };
        element.modify_time = modify_time.unwrap_or_else(Utc::now);
        element.is_deleted = false;
        element.is_downloading = false;
        element.external_http_path = None;

        let dest = self.local_path(owner, uuid);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match source {
            Some(src) if src != dest => {
                tokio::fs::copy(src, &dest).await?;
            }
            Some(_) => {}
            None if element.id == 0 => tokio::fs::write(&dest, b"").await?,
            None => {}
        }

        self.persist(&mut element)?;
        tracing::info!(owner = %owner, uuid = %uuid, path = %element.path, "Stored local file");
        self.update_content(element, true).await
    }

    /// Recompute hash and size from disk, optionally announcing the result.
    /// Elements mid-download are left alone. `modify_time` is the caller's
    /// to set.
    pub async fn update_content(
        &self,
        mut element: FileStoreElement,
        announce: bool,
    ) -> Result<FileStoreElement> {
        if element.is_downloading {
            tracing::debug!(uuid = %element.uuid, "Skipping content update during download");
            return Ok(element);
        }
        let (hash, size) = hash_path(self.local_path(&element.owner_key_id, element.uuid)).await?;
        element.content_hash = hash;
        element.size_bytes = size;
        self.db.save_file_element(&element)?;

        if announce {
            self.announce(&element).await?;
        }
        Ok(element)
    }

    /// Queue a `file` event describing `element` to its owner.
    pub async fn announce(&self, element: &FileStoreElement) -> Result<QueuedEvent> {
        let recipient = self.db.get_user_by_key_id(&element.owner_key_id)?;
        let mut announcement = FileAnnouncement {
            uuid: element.uuid,
            http_path: Self::locator(element),
            path: element.path.clone(),
            hash: element.content_hash.clone(),
            size_bytes: element.size_bytes,
            is_deleted: element.is_deleted,
            modify_time: element.modify_time,
            bytes: None,
        };

        if !element.is_deleted
            && element.size_bytes > 0
            && element.size_bytes <= self.inline_threshold
        {
            let path = self.local_path(&element.owner_key_id, element.uuid);
            match tokio::fs::read(&path).await {
                Ok(content) if content.len() as u64 == element.size_bytes => {
                    announcement = announcement.with_inline_bytes(&content);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "Could not inline file content"),
            }
        }

        tracing::debug!(
            owner = %element.owner_key_id,
            uuid = %element.uuid,
            size = element.size_bytes,
            deleted = element.is_deleted,
            "Announcing file"
        );
        self.outbox
            .queue_event(Event::new(EventPayload::File(announcement)), &recipient)
    }

    /// Tombstone an object, drop its bytes and announce the deletion.
    pub async fn mark_deleted(&self, owner: &KeyId, uuid: Uuid) -> Result<FileStoreElement> {
        let mut element = self.db.get_file_element(owner, uuid)?;
        element.is_deleted = true;
        element.is_downloading = false;
        element.external_http_path = None;
        element.content_hash = empty_digest();
        element.size_bytes = 0;
        element.modify_time = Utc::now();
        remove_local(&self.local_path(owner, uuid)).await?;
        self.db.save_file_element(&element)?;
        self.announce(&element).await?;
        Ok(element)
    }

    /// Announce every local object whose size on disk no longer matches
    /// the record. Returns how many changed.
    pub async fn scan_once(&self) -> Result<usize> {
        let mut changed = 0;
        for element in self.db.list_scan_candidates()? {
            let path = self.local_path(&element.owner_key_id, element.uuid);
            let on_disk = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot stat file");
                    continue;
                }
            };
            if on_disk == element.size_bytes {
                continue;
            }
            let mut element = element;
            element.modify_time = Utc::now();
            let uuid = element.uuid;
            match self.update_content(element, true).await {
                Ok(_) => changed += 1,
                Err(e) => tracing::warn!(uuid = %uuid, error = %e, "Failed to update changed file"),
            }
        }
        Ok(changed)
    }

    /// Apply a peer's announcement about an object it shares with us.
    ///
    /// Returns the resulting element, or `None` for a tombstone of an
    /// object we never had.
    pub async fn apply_remote(
        &self,
        sender: &UserInfo,
        announcement: &FileAnnouncement,
    ) -> Result<Option<FileStoreElement>> {
        let owner = &sender.key_id;
        let local = self.local_path(owner, announcement.uuid);
        let existing = match self.db.get_file_element(owner, announcement.uuid) {
            Ok(element) => Some(element),
            Err(e) if is_not_found(&e) => None,
            Err(e) => return Err(e.into()),
        };

        if announcement.is_deleted {
            let Some(mut element) = existing else {
                return Ok(None);
            };
            element.is_deleted = true;
            element.external_http_path = None;
            element.content_hash = empty_digest();
            element.size_bytes = 0;
            element.modify_time = announcement.modify_time;
            // An in-flight download owns the bytes and removes them when it
            // sees the tombstone.
            if !element.is_downloading {
                remove_local(&local).await?;
            }
            self.db.save_file_element(&element)?;
            tracing::info!(owner = %owner, uuid = %element.uuid, "Peer deleted file");
            return Ok(Some(element));
        }

        let mut element = existing.unwrap_or_else(|| Self::blank_element(owner, announcement.uuid));
        element.path = announcement.path.clone();
        element.modify_time = announcement.modify_time;
        element.is_deleted = false;

        if element.id != 0
            && element.content_hash == announcement.hash
            && element.external_http_path.is_none()
        {
            self.db.save_file_element(&element)?;
            return Ok(Some(element));
        }

        if element.is_downloading {
            // Record the newer content only; the running download sees the
            // changed locator and the next cycle fetches it.
            match sender.endpoint.join(&announcement.http_path) {
                Some(remote) => {
                    element.external_http_path = Some(remote.to_string());
                    element.content_hash = announcement.hash.clone();
                    element.size_bytes = announcement.size_bytes;
                }
                None => tracing::warn!(
                    owner = %owner,
                    endpoint = %sender.endpoint,
                    "Cannot resolve file locator against sender endpoint"
                ),
            }
            self.db.save_file_element(&element)?;
            tracing::debug!(owner = %owner, uuid = %element.uuid, "Re-announced during download");
            return Ok(Some(element));
        }

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Some(content) = announcement.inline_bytes().transpose()? {
            if digest(&content) == announcement.hash {
                tokio::fs::write(&local, &content).await?;
                element.content_hash = announcement.hash.clone();
                element.size_bytes = content.len() as u64;
                element.external_http_path = None;
                self.persist(&mut element)?;
                tracing::debug!(owner = %owner, uuid = %element.uuid, "Stored inline file");
                return Ok(Some(element));
            }
            tracing::warn!(uuid = %element.uuid, "Inline content does not match hash, downloading");
        }

        match sender.endpoint.join(&announcement.http_path) {
            Some(remote) => {
                element.external_http_path = Some(remote.to_string());
                element.content_hash = announcement.hash.clone();
                element.size_bytes = announcement.size_bytes;
                tokio::fs::write(&local, b"").await?;
            }
            None => {
                tracing::warn!(
                    owner = %owner,
                    endpoint = %sender.endpoint,
                    "Cannot resolve file locator against sender endpoint"
                );
            }
        }
        self.persist(&mut element)?;
        Ok(Some(element))
    }

    /// Where to read the bytes for a locator, if it names current content.
    pub fn serve_path(&self, owner: &KeyId, uuid: Uuid, hash: &str) -> Result<Option<PathBuf>> {
        match self.db.get_file_element(owner, uuid) {
            Ok(element)
                if !element.is_deleted
                    && !element.is_downloading
                    && element.external_http_path.is_none()
                    && element.content_hash == hash =>
            {
                Ok(Some(self.local_path(owner, uuid)))
            }
            Ok(_) => Ok(None),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Start a download task for every pending object not already in flight.
    pub fn trigger_downloads(&self) -> Result<Spawned<DownloadOutcome>> {
        let mut handles = Vec::new();
        for element in self.db.list_pending_downloads()? {
            let Some(claim) = self.try_claim(&element) else {
                continue;
            };
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                let _claim = claim;
                let uuid = element.uuid;
                match this.download_locked(element).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(uuid = %uuid, error = %e, "Download failed");
                        DownloadOutcome::Failed
                    }
                }
            }));
        }
        Ok(Spawned::new(handles))
    }

    /// Download one pending object unless another task already is.
    pub async fn download(&self, element: FileStoreElement) -> Result<DownloadOutcome> {
        let Some(_claim) = self.try_claim(&element) else {
            return Ok(DownloadOutcome::Skipped);
        };
        self.download_locked(element).await
    }

    async fn download_locked(&self, listed: FileStoreElement) -> Result<DownloadOutcome> {
        // The listing may predate the claim; work from the current row.
        let mut element = match self.db.get_file_element_by_id(listed.id) {
            Ok(element) if !element.is_deleted => element,
            Ok(_) => return Ok(DownloadOutcome::Skipped),
            Err(e) if is_not_found(&e) => return Ok(DownloadOutcome::Skipped),
            Err(e) => return Err(e.into()),
        };
        let Some(locator) = element.external_http_path.clone() else {
            return Ok(DownloadOutcome::Skipped);
        };
        let remote = match Endpoint::parse(&locator) {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(locator = %locator, error = %e, "Unparseable file locator");
                return self.abandon(element).await;
            }
        };

        element.is_downloading = true;
        self.db.save_file_element(&element)?;
        let dest = self.local_path(&element.owner_key_id, element.uuid);
        remove_local(&dest).await?;

        for attempt in 1..=self.max_attempts {
            let fetched = tokio::time::timeout(
                self.attempt_timeout,
                self.transport.download(&remote, &dest),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout(self.attempt_timeout)));
            match fetched {
                Ok(bytes) => {
                    tracing::debug!(uuid = %element.uuid, bytes, attempt, "Download finished");
                    return self.complete_download(element.id, &locator).await;
                }
                Err(e) => {
                    tracing::warn!(
                        uuid = %element.uuid,
                        attempt,
                        max = self.max_attempts,
                        error = %e,
                        "Download attempt failed"
                    );
                }
            }
        }

        self.abandon(element).await
    }

    async fn complete_download(&self, id: i64, locator: &str) -> Result<DownloadOutcome> {
        let mut element = self.db.get_file_element_by_id(id)?;
        element.is_downloading = false;

        // A newer announcement replaced the locator while we were fetching.
        if element.external_http_path.as_deref() != Some(locator) {
            if element.is_deleted {
                remove_local(&self.local_path(&element.owner_key_id, element.uuid)).await?;
            }
            self.db.save_file_element(&element)?;
            return Ok(DownloadOutcome::Skipped);
        }

        let announced = element.content_hash.clone();
        element.external_http_path = None;
        let element = self.update_content(element, false).await?;
        if element.content_hash != announced {
            tracing::warn!(
                uuid = %element.uuid,
                expected = %announced,
                actual = %element.content_hash,
                "Downloaded content does not match announced hash"
            );
        }

        match self.db.get_user_by_key_id(&element.owner_key_id) {
            Ok(user) => self.callbacks.emit_file(&user, &element, true),
            Err(e) => tracing::debug!(error = %e, "File owner is no longer a contact"),
        }
        Ok(DownloadOutcome::Completed)
    }

    async fn abandon(&self, element: FileStoreElement) -> Result<DownloadOutcome> {
        self.db.delete_file_element(element.id)?;
        remove_local(&self.local_path(&element.owner_key_id, element.uuid)).await?;
        tracing::warn!(
            owner = %element.owner_key_id,
            uuid = %element.uuid,
            "Giving up on download"
        );
        self.callbacks.emit_download_failed(&element);
        Ok(DownloadOutcome::Abandoned)
    }

    /// Change-detection loop; never returns.
    pub async fn run_scan_loop(self) {
        let mut interval = tokio::time::interval(self.scan_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.scan_once().await {
                tracing::error!(error = %e, "File scan failed");
            }
        }
    }

    /// Download loop; never returns.
    pub async fn run_download_loop(self) {
        let mut interval = tokio::time::interval(self.download_interval);
        loop {
            interval.tick().await;
            match self.trigger_downloads() {
                Ok(spawned) if !spawned.is_empty() => {
                    tracing::debug!(count = spawned.len(), "Started downloads");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Download cycle failed"),
            }
            self.locks.purge_idle();
        }
    }
}
