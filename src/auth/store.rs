//! Observable token store
//!
//! Holds the current token set for one session, persists it through an
//! optional [`StorageAdapter`], and notifies subscribers synchronously on
//! every change. Writes are serialized so that the in-memory value,
//! subscriber notification and persistence happen as one unit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::storage::{StorageAdapter, StorageEvent, StorageEvents};
use super::tokens::{TokenSet, TokenSetPatch};

/// Callback fired with the new value after every change.
pub type Listener = Arc<dyn Fn(Option<&TokenSet>) + Send + Sync>;

/// Callback fired when the storage adapter fails to save.
pub type PersistErrorHook = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Construction options for [`TokenStore`].
pub struct StoreOptions {
    pub initial: Option<TokenSet>,
    pub storage: Option<Arc<dyn StorageAdapter>>,
    /// Bus for cross-instance sync; requires the adapter to declare a sync key.
    pub events: Option<StorageEvents>,
    /// Load persisted tokens in the background and before first use.
    pub auto_hydrate: bool,
    pub clock: Arc<dyn Clock>,
    pub on_persist_error: Option<PersistErrorHook>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            initial: None,
            storage: None,
            events: None,
            auto_hydrate: true,
            clock: Arc::new(SystemClock),
            on_persist_error: None,
        }
    }
}

impl StoreOptions {
    pub fn initial(mut self, tokens: TokenSet) -> Self {
        self.initial = Some(tokens);
        self
    }

    pub fn storage(mut self, storage: impl StorageAdapter + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn events(mut self, events: StorageEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn auto_hydrate(mut self, enabled: bool) -> Self {
        self.auto_hydrate = enabled;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn on_persist_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        self.on_persist_error = Some(Arc::new(hook));
        self
    }
}

/// Authoritative holder of the current [`TokenSet`]. Cheap to clone; clones
/// share state.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    id: Uuid,
    current: Mutex<Option<TokenSet>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    write_lock: tokio::sync::Mutex<()>,
    hydrated: OnceCell<()>,
    auto_hydrate: bool,
    storage: Option<Arc<dyn StorageAdapter>>,
    events: Option<StorageEvents>,
    clock: Arc<dyn Clock>,
    on_persist_error: Option<PersistErrorHook>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let task = self
            .sync_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Handle returned by [`TokenStore::subscribe`].
pub struct Subscription {
    store: Weak<StoreInner>,
    id: u64,
}

impl Subscription {
    /// Detach the listener. Safe to call repeatedly and from inside a
    /// listener callback.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.store.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl TokenStore {
    /// Build a store. Background hydration and cross-instance sync are only
    /// started when called inside a tokio runtime.
    pub fn new(options: StoreOptions) -> Self {
        let clock = options.clock;
        let initial = options.initial.map(|mut t| {
            t.stamp_expiry(clock.now_ms());
            t
        });

        let store = Self {
            inner: Arc::new(StoreInner {
                id: Uuid::new_v4(),
                current: Mutex::new(initial),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                write_lock: tokio::sync::Mutex::new(()),
                hydrated: OnceCell::new(),
                auto_hydrate: options.auto_hydrate,
                storage: options.storage,
                events: options.events,
                clock,
                on_persist_error: options.on_persist_error,
                sync_task: Mutex::new(None),
            }),
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            if let Some(task) = store.spawn_sync(&handle) {
                *store.inner.sync_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
            }
            if store.inner.auto_hydrate && store.inner.storage.is_some() {
                let bg = store.clone();
                handle.spawn(async move { bg.hydrate().await });
            }
        }

        store
    }

    /// In-memory store with no persistence.
    pub fn in_memory(initial: Option<TokenSet>) -> Self {
        Self::new(StoreOptions {
            initial,
            ..StoreOptions::default()
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Load persisted tokens once. Concurrent and repeated calls share the
    /// same load. A failed load leaves the store as it was.
    pub async fn hydrate(&self) {
        let Some(storage) = self.inner.storage.as_ref() else {
            return;
        };
        self.inner
            .hydrated
            .get_or_init(|| async {
                match storage.load().await {
                    Ok(Some(mut tokens)) => {
                        tracing::debug!("Hydrated tokens from storage");
                        tokens.stamp_expiry(self.inner.clock.now_ms());
                        self.replace(Some(tokens));
                    }
                    Ok(None) => {
                        tracing::debug!("No persisted tokens");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load persisted tokens, starting empty: {:#}", e);
                    }
                }
            })
            .await;
    }

    async fn ensure_hydrated(&self) {
        if self.inner.auto_hydrate {
            self.hydrate().await;
        }
    }

    /// Current token set, after any pending hydration.
    pub async fn get(&self) -> Option<TokenSet> {
        self.ensure_hydrated().await;
        self.snapshot()
    }

    /// Current token set without waiting for hydration.
    pub fn snapshot(&self) -> Option<TokenSet> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the token set (`None` clears it). Every subscriber has seen
    /// the new value by the time this returns. Persistence is best-effort.
    pub async fn set(&self, tokens: Option<TokenSet>) {
        self.ensure_hydrated().await;
        let _guard = self.inner.write_lock.lock().await;
        self.write_locked(tokens).await;
    }

    /// Merge `patch` onto the current set. With no current set, a new one is
    /// created only if the patch carries an access token; otherwise nothing
    /// changes and `None` is returned.
    pub async fn update(&self, patch: TokenSetPatch) -> Option<TokenSet> {
        self.ensure_hydrated().await;
        let _guard = self.inner.write_lock.lock().await;

        let now = self.inner.clock.now_ms();
        let next = match self.snapshot() {
            Some(mut current) => {
                current.merge(patch, now);
                current
            }
            None if patch.access_token.as_deref().is_some_and(|t| !t.is_empty()) => {
                patch.into_token_set(now)
            }
            None => return None,
        };

        self.write_locked(Some(next)).await
    }

    /// Clear the token set and release adapter resources.
    pub async fn clear(&self) {
        self.set(None).await;
        if let Some(storage) = &self.inner.storage {
            storage.release().await;
        }
    }

    /// Register `listener` for every future change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<&TokenSet>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// True if there is no usable token or it expires within `grace`.
    pub fn is_expired(&self, grace: Duration) -> bool {
        let grace_ms = i64::try_from(grace.as_millis()).unwrap_or(i64::MAX);
        match self.snapshot() {
            Some(tokens) => tokens.is_expired_at(self.inner.clock.now_ms(), grace_ms),
            None => true,
        }
    }

    /// Detach all listeners and stop cross-instance sync.
    pub fn destroy(&self) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        let task = self
            .inner
            .sync_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Caller must hold the write lock.
    async fn write_locked(&self, mut tokens: Option<TokenSet>) -> Option<TokenSet> {
        if let Some(t) = tokens.as_mut() {
            t.stamp_expiry(self.inner.clock.now_ms());
        }
        self.replace(tokens.clone());
        self.persist(tokens.as_ref()).await;
        tokens
    }

    fn replace(&self, tokens: Option<TokenSet>) {
        *self.inner.current.lock().unwrap_or_else(|e| e.into_inner()) = tokens.clone();
        self.notify(tokens.as_ref());
    }

    fn notify(&self, tokens: Option<&TokenSet>) {
        // Iterate a snapshot so listeners may unsubscribe mid-notification.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(tokens);
        }
    }

    async fn persist(&self, tokens: Option<&TokenSet>) {
        let Some(storage) = &self.inner.storage else {
            return;
        };
        match storage.save(tokens).await {
            Ok(()) => {
                if let (Some(events), Some(key)) = (&self.inner.events, storage.sync_key()) {
                    events.publish(StorageEvent {
                        key: key.to_string(),
                        origin: self.inner.id,
                    });
                }
            }
            Err(e) => {
                tracing::warn!("Failed to persist tokens: {:#}", e);
                if let Some(hook) = &self.inner.on_persist_error {
                    hook(&e);
                }
            }
        }
    }

    /// Re-read the adapter after another instance wrote to it.
    async fn reload_from_storage(&self) {
        let Some(storage) = &self.inner.storage else {
            return;
        };
        let _guard = self.inner.write_lock.lock().await;
        match storage.load().await {
            Ok(mut tokens) => {
                if let Some(t) = tokens.as_mut() {
                    t.stamp_expiry(self.inner.clock.now_ms());
                }
                tracing::debug!("Reloaded tokens after external write");
                self.replace(tokens);
            }
            Err(e) => {
                tracing::warn!("Failed to reload tokens after external write: {:#}", e);
            }
        }
    }

    fn spawn_sync(&self, handle: &tokio::runtime::Handle) -> Option<JoinHandle<()>> {
        let events = self.inner.events.as_ref()?;
        let key = self.inner.storage.as_ref()?.sync_key()?.to_string();
        let mut rx = events.subscribe();
        let weak = Arc::downgrade(&self.inner);

        Some(handle.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.key != key {
                            continue;
                        }
                        let Some(inner) = weak.upgrade() else { break };
                        if event.origin == inner.id {
                            continue;
                        }
                        TokenStore { inner }.reload_from_storage().await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Storage sync lagged by {} events, reloading", skipped);
                        let Some(inner) = weak.upgrade() else { break };
                        TokenStore { inner }.reload_from_storage().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::storage::MemoryStorage;
    use anyhow::{anyhow, Result};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    const NOW: i64 = 1_700_000_000_000;

    /// Memory storage that counts loads and can be made to fail.
    #[derive(Default)]
    struct ProbeStorage {
        inner: MemoryStorage,
        loads: Arc<AtomicUsize>,
        fail_load: bool,
        fail_save: bool,
    }

    impl StorageAdapter for ProbeStorage {
        fn load(&self) -> BoxFuture<'_, Result<Option<TokenSet>>> {
            async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                if self.fail_load {
                    return Err(anyhow!("disk unavailable"));
                }
                self.inner.load().await
            }
            .boxed()
        }

        fn save<'a>(&'a self, tokens: Option<&'a TokenSet>) -> BoxFuture<'a, Result<()>> {
            async move {
                if self.fail_save {
                    return Err(anyhow!("disk full"));
                }
                self.inner.save(tokens).await
            }
            .boxed()
        }
    }

    fn store_at(now: i64) -> TokenStore {
        TokenStore::new(StoreOptions::default().clock(ManualClock::new(now)))
    }

    #[tokio::test]
    async fn test_set_notifies_before_returning() {
        let store = store_at(NOW);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        store.subscribe(move |t| {
            seen2
                .lock()
                .unwrap()
                .push(t.and_then(|t| t.access_token.clone()));
        });

        store.set(Some(TokenSet::new("a1"))).await;
        assert_eq!(*seen.lock().unwrap(), vec![Some("a1".to_string())]);

        store.clear().await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("a1".to_string()), None]
        );
        assert_eq!(store.get().await, None);
    }

    #[tokio::test]
    async fn test_listener_observes_post_write_value() {
        let store = store_at(NOW);
        let observer = store.clone();
        let matched = Arc::new(AtomicUsize::new(0));
        let matched2 = Arc::clone(&matched);
        store.subscribe(move |t| {
            if observer.snapshot().as_ref() == t {
                matched2.fetch_add(1, Ordering::SeqCst);
            }
        });

        store.set(Some(TokenSet::new("x"))).await;
        store.update(TokenSetPatch::access_token("y")).await;
        assert_eq!(matched.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_update_merges_onto_current() {
        let store = store_at(NOW);
        store
            .set(Some(TokenSet::new("A").with_refresh_token("R")))
            .await;

        let updated = store.update(TokenSetPatch::access_token("B")).await;
        assert_eq!(updated, Some(TokenSet::new("B").with_refresh_token("R")));
        assert_eq!(store.get().await, updated);
    }

    #[tokio::test]
    async fn test_update_without_current_needs_access_token() {
        let store = store_at(NOW);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        store.subscribe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });

        let none = store
            .update(TokenSetPatch {
                refresh_token: Some("R".into()),
                ..TokenSetPatch::default()
            })
            .await;
        assert_eq!(none, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let created = store
            .update(TokenSetPatch {
                access_token: Some("A".into()),
                expires_in: Some(60),
                ..TokenSetPatch::default()
            })
            .await
            .unwrap();
        assert_eq!(created.access_token.as_deref(), Some("A"));
        assert_eq!(created.expires_at, Some(NOW + 60_000));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let store = store_at(NOW);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let sub = store.subscribe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });

        store.set(Some(TokenSet::new("a"))).await;
        sub.unsubscribe();
        sub.unsubscribe();
        store.set(Some(TokenSet::new("b"))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_from_inside_listener() {
        let store = store_at(NOW);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot2 = Arc::clone(&slot);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let sub = store.subscribe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot2.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        let other = Arc::new(AtomicUsize::new(0));
        let other2 = Arc::clone(&other);
        store.subscribe(move |_| {
            other2.fetch_add(1, Ordering::SeqCst);
        });

        store.set(Some(TokenSet::new("a"))).await;
        store.set(Some(TokenSet::new("b"))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_is_expired_with_margin() {
        let clock = ManualClock::new(NOW);
        let store = TokenStore::new(StoreOptions::default().clock(clock.clone()));
        let margin = Duration::from_secs(30);

        assert!(store.is_expired(margin));

        store
            .set(Some(TokenSet::new("a").with_expires_at(NOW + 10_000)))
            .await;
        assert!(store.is_expired(margin));
        assert!(!store.is_expired(Duration::ZERO));

        store
            .set(Some(TokenSet::new("a").with_expires_at(NOW + 60_000)))
            .await;
        assert!(!store.is_expired(margin));

        clock.advance_secs(31);
        assert!(store.is_expired(margin));
    }

    #[tokio::test]
    async fn test_relative_lifetime_stamped_on_set() {
        let clock = ManualClock::new(NOW);
        let store = TokenStore::new(StoreOptions::default().clock(clock.clone()));
        store.set(Some(TokenSet::new("a").with_expires_in(60))).await;

        assert_eq!(store.snapshot().unwrap().expires_at, Some(NOW + 60_000));
        clock.advance_secs(59);
        assert!(!store.is_expired(Duration::ZERO));
        clock.advance_secs(1);
        assert!(store.is_expired(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_hydration_is_shared() {
        let storage = ProbeStorage {
            inner: MemoryStorage::with_tokens(TokenSet::new("persisted")),
            ..ProbeStorage::default()
        };
        let loads = Arc::clone(&storage.loads);
        let store = TokenStore::new(StoreOptions::default().storage(storage));

        let (a, b, c) = tokio::join!(store.get(), store.get(), store.get());
        for got in [a, b, c] {
            assert_eq!(got.unwrap().access_token.as_deref(), Some("persisted"));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        store.get().await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hydration_failure_keeps_seed() {
        let storage = ProbeStorage {
            fail_load: true,
            ..ProbeStorage::default()
        };
        let store = TokenStore::new(
            StoreOptions::default()
                .initial(TokenSet::new("seed"))
                .storage(storage),
        );
        assert_eq!(store.get().await, Some(TokenSet::new("seed")));
    }

    #[tokio::test]
    async fn test_set_waits_for_hydration() {
        let storage = ProbeStorage {
            inner: MemoryStorage::with_tokens(TokenSet::new("old")),
            ..ProbeStorage::default()
        };
        let store = TokenStore::new(StoreOptions::default().storage(storage));

        store.set(Some(TokenSet::new("new"))).await;
        // Hydration must not overwrite a later write.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get().await, Some(TokenSet::new("new")));
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_value() {
        let storage = ProbeStorage {
            fail_save: true,
            ..ProbeStorage::default()
        };
        let failures = Arc::new(AtomicUsize::new(0));
        let failures2 = Arc::clone(&failures);
        let store = TokenStore::new(
            StoreOptions::default()
                .storage(storage)
                .on_persist_error(move |e| {
                    assert_eq!(e.to_string(), "disk full");
                    failures2.fetch_add(1, Ordering::SeqCst);
                }),
        );

        store.set(Some(TokenSet::new("a"))).await;
        assert_eq!(store.get().await, Some(TokenSet::new("a")));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_persists_and_clear_removes() {
        let storage = MemoryStorage::new();
        let store = TokenStore::new(StoreOptions::default().storage(storage.clone()));

        store.set(Some(TokenSet::new("a"))).await;
        assert_eq!(storage.peek(), Some(TokenSet::new("a")));

        store.clear().await;
        assert_eq!(storage.peek(), None);
    }

    #[tokio::test]
    async fn test_cross_instance_sync() {
        let events = StorageEvents::new();
        let shared = MemoryStorage::new().with_sync_key("campus.session");
        let writer = TokenStore::new(
            StoreOptions::default()
                .storage(shared.clone())
                .events(events.clone()),
        );
        let reader = TokenStore::new(
            StoreOptions::default()
                .storage(shared.clone())
                .events(events.clone()),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        reader.subscribe(move |t| {
            let _ = tx.send(t.cloned());
        });
        // Writer should not react to its own write.
        let own = Arc::new(AtomicUsize::new(0));
        let own2 = Arc::clone(&own);
        writer.subscribe(move |_| {
            own2.fetch_add(1, Ordering::SeqCst);
        });

        writer.set(Some(TokenSet::new("from-writer"))).await;

        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("reader was not notified")
            .unwrap();
        assert_eq!(seen, Some(TokenSet::new("from-writer")));
        assert_eq!(reader.snapshot(), Some(TokenSet::new("from-writer")));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(own.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_destroy_detaches_listeners_and_sync() {
        let events = StorageEvents::new();
        let shared = MemoryStorage::new().with_sync_key("k");
        let writer = TokenStore::new(
            StoreOptions::default()
                .storage(shared.clone())
                .events(events.clone()),
        );
        let reader = TokenStore::new(
            StoreOptions::default()
                .storage(shared.clone())
                .events(events.clone()),
        );
        reader.get().await;
        reader.subscribe(|_| panic!("listener survived destroy"));
        reader.destroy();
        assert_eq!(reader.listener_count(), 0);

        writer.set(Some(TokenSet::new("x"))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reader.snapshot(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_serialize() {
        let store = store_at(NOW);
        store.set(Some(TokenSet::new("a"))).await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut meta = std::collections::BTreeMap::new();
                meta.insert(format!("k{}", i), i.to_string());
                store
                    .update(TokenSetPatch {
                        metadata: Some(meta),
                        ..TokenSetPatch::default()
                    })
                    .await
            }));
        }
        for t in tasks {
            tokio_test::assert_ok!(t.await);
        }

        assert_eq!(store.snapshot().unwrap().metadata.len(), 16);
    }
}
