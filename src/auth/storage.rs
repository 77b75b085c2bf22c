//! Persistence backends for the token store
//!
//! The store only calls `load`/`save` and reads the optional sync key; it
//! never knows whether tokens live in memory, a file, or an OS keychain.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::tokens::TokenSet;

/// Durable storage for a single token set.
pub trait StorageAdapter: Send + Sync {
    /// Load the persisted token set, if any.
    fn load(&self) -> BoxFuture<'_, Result<Option<TokenSet>>>;

    /// Persist `tokens`; `None` removes the stored entry.
    fn save<'a>(&'a self, tokens: Option<&'a TokenSet>) -> BoxFuture<'a, Result<()>>;

    /// Key identifying this entry for cross-instance change notification.
    fn sync_key(&self) -> Option<&str> {
        None
    }

    /// Release any resources held by the adapter.
    fn release(&self) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }
}

/// In-process storage. Clones share the same slot, so two stores built on
/// clones of one `MemoryStorage` see each other's writes.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<TokenSet>>>,
    key: Option<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with `tokens`.
    pub fn with_tokens(tokens: TokenSet) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(tokens))),
            key: None,
        }
    }

    /// Enable cross-instance sync under `key`.
    pub fn with_sync_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Current persisted value.
    pub fn peek(&self) -> Option<TokenSet> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl StorageAdapter for MemoryStorage {
    fn load(&self) -> BoxFuture<'_, Result<Option<TokenSet>>> {
        let value = self.peek();
        async move { Ok(value) }.boxed()
    }

    fn save<'a>(&'a self, tokens: Option<&'a TokenSet>) -> BoxFuture<'a, Result<()>> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = tokens.cloned();
        async { Ok(()) }.boxed()
    }

    fn sync_key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// Token set persisted as a TOML file.
pub struct FileStorage {
    path: PathBuf,
    key: Option<String>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: None,
        }
    }

    /// `tokens.toml` inside the given config directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("tokens.toml"))
    }

    pub fn with_sync_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<TokenSet>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).context("Failed to read token file")?;
        let tokens = toml::from_str(&content).context("Failed to parse token file")?;
        Ok(Some(tokens))
    }

    fn write(&self, tokens: Option<&TokenSet>) -> Result<()> {
        let Some(tokens) = tokens else {
            if self.path.exists() {
                fs::remove_file(&self.path).context("Failed to remove token file")?;
            }
            return Ok(());
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create token directory")?;
        }
        let content = toml::to_string_pretty(tokens).context("Failed to serialize tokens")?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // New token files are owner-only from the moment they exist
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .context("Failed to open token file")?;

        // `mode` only applies on creation; tighten a pre-existing file too
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            file.set_permissions(perms)
                .context("Failed to set token file permissions")?;
        }

        file.write_all(content.as_bytes())
            .context("Failed to write token file")?;
        Ok(())
    }
}

impl StorageAdapter for FileStorage {
    fn load(&self) -> BoxFuture<'_, Result<Option<TokenSet>>> {
        async move { self.read() }.boxed()
    }

    fn save<'a>(&'a self, tokens: Option<&'a TokenSet>) -> BoxFuture<'a, Result<()>> {
        async move { self.write(tokens) }.boxed()
    }

    fn sync_key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// A write to shared storage, published by the store that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub origin: Uuid,
}

/// Broadcast bus connecting token stores that share a storage backend.
#[derive(Clone)]
pub struct StorageEvents {
    tx: broadcast::Sender<StorageEvent>,
}

impl StorageEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StorageEvent) {
        // No receivers just means nobody else is listening.
        let _ = self.tx.send(event);
    }
}

impl Default for StorageEvents {
    fn default() -> Self {
        Self::new()
    }
}
