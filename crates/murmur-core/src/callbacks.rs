//! Host-registered observers.
//!
//! Callbacks run synchronously on the task that applied the event, after the
//! state change has been persisted. They must not block.

use std::sync::{Arc, RwLock};

use murmur_shared::Event;
use murmur_store::{FileStoreElement, Message, UserInfo};

type EventFn = Arc<dyn Fn(&Event) + Send + Sync>;
type MessageFn = Arc<dyn Fn(&UserInfo, &Event, &Message) + Send + Sync>;
type IntroduceFn = Arc<dyn Fn(&UserInfo, &Event) + Send + Sync>;
type FileFn = Arc<dyn Fn(&UserInfo, &FileStoreElement, bool) + Send + Sync>;
type DownloadFailedFn = Arc<dyn Fn(&FileStoreElement) + Send + Sync>;

#[derive(Default)]
struct Registered {
    event: Vec<EventFn>,
    message: Vec<MessageFn>,
    introduce: Vec<IntroduceFn>,
    file: Vec<FileFn>,
    download_failed: Vec<DownloadFailedFn>,
}

#[derive(Clone, Default)]
pub struct Callbacks {
    inner: Arc<RwLock<Registered>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every decoded event, before it is applied.
    pub fn on_event(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.write().event.push(Arc::new(f));
    }

    pub fn on_message(&self, f: impl Fn(&UserInfo, &Event, &Message) + Send + Sync + 'static) {
        self.write().message.push(Arc::new(f));
    }

    pub fn on_introduce(&self, f: impl Fn(&UserInfo, &Event) + Send + Sync + 'static) {
        self.write().introduce.push(Arc::new(f));
    }

    /// File object changes. The flag is `true` for content that came from
    /// the peer.
    pub fn on_file(&self, f: impl Fn(&UserInfo, &FileStoreElement, bool) + Send + Sync + 'static) {
        self.write().file.push(Arc::new(f));
    }

    pub fn on_download_failed(&self, f: impl Fn(&FileStoreElement) + Send + Sync + 'static) {
        self.write().download_failed.push(Arc::new(f));
    }

    pub(crate) fn emit_event(&self, event: &Event) {
        for f in self.read(|r| r.event.clone()) {
            f(event);
        }
    }

    pub(crate) fn emit_message(&self, user: &UserInfo, event: &Event, message: &Message) {
        for f in self.read(|r| r.message.clone()) {
            f(user, event, message);
        }
    }

    pub(crate) fn emit_introduce(&self, user: &UserInfo, event: &Event) {
        for f in self.read(|r| r.introduce.clone()) {
            f(user, event);
        }
    }

    pub(crate) fn emit_file(&self, user: &UserInfo, element: &FileStoreElement, incoming: bool) {
        for f in self.read(|r| r.file.clone()) {
            f(user, element, incoming);
        }
    }

    pub(crate) fn emit_download_failed(&self, element: &FileStoreElement) {
        for f in self.read(|r| r.download_failed.clone()) {
            f(element);
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registered> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    // Snapshot under the lock so a callback may register further callbacks.
    fn read<T>(&self, f: impl FnOnce(&Registered) -> Vec<T>) -> Vec<T> {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        f(&guard)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use murmur_shared::event::ChatMessage;
    use murmur_shared::{EventPayload, MessageKind};

    use super::*;

    #[test]
    fn test_all_registered_callbacks_fire() {
        let callbacks = Callbacks::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = hits.clone();
            callbacks.on_event(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let event = Event::new(EventPayload::Message(ChatMessage {
            text: "x".to_string(),
            msg_uuid: String::new(),
            kind: MessageKind::Text,
        }));
        callbacks.emit_event(&event);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clones_share_registrations() {
        let callbacks = Callbacks::new();
        let clone = callbacks.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        clone.on_download_failed(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(callbacks.read(|r| r.download_failed.clone()).len(), 1);
    }
}
