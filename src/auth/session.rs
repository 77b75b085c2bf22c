//! Session manager: refresh orchestration over a [`TokenStore`]
//!
//! Only one refresh runs at a time. Callers arriving while a refresh is in
//! flight join it and observe the identical result, success or error. The
//! refresh itself runs on its own task, so a caller that stops waiting (or a
//! stopped background timer) never cancels it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::AuthError;
use super::store::TokenStore;
use super::tokens::{TokenSet, TokenSetPatch};

/// Default buffer before expiry at which a token is refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Default tick of the background refresh timer.
pub const DEFAULT_BACKGROUND_INTERVAL: Duration = Duration::from_secs(15);

/// Substituted for a zero background interval.
const MIN_BACKGROUND_INTERVAL: Duration = Duration::from_secs(1);

/// What a refresh handler produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No new data; keep whatever is stored.
    Unchanged,
    /// Session explicitly ended; clear the store.
    Cleared,
    /// Replace the stored token set.
    Replaced(TokenSet),
}

/// Obtains a new token set, given the current one.
pub trait RefreshHandler: Send + Sync {
    fn refresh(
        &self,
        current: Option<TokenSet>,
    ) -> BoxFuture<'static, anyhow::Result<RefreshOutcome>>;
}

impl<F, Fut> RefreshHandler for F
where
    F: Fn(Option<TokenSet>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<RefreshOutcome>> + Send + 'static,
{
    fn refresh(
        &self,
        current: Option<TokenSet>,
    ) -> BoxFuture<'static, anyhow::Result<RefreshOutcome>> {
        self(current).boxed()
    }
}

type RefreshResult = Result<Option<TokenSet>, AuthError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// Observability callbacks. Each fires once per refresh flight.
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub on_refresh_start: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_refresh_success: Option<Arc<dyn Fn(Option<&TokenSet>) + Send + Sync>>,
    pub on_refresh_error: Option<Arc<dyn Fn(&AuthError) + Send + Sync>>,
}

/// Construction options for [`SessionManager`].
#[derive(Clone)]
pub struct SessionOptions {
    pub handler: Option<Arc<dyn RefreshHandler>>,
    pub refresh_margin: Duration,
    pub background_interval: Duration,
    pub hooks: SessionHooks,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            handler: None,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            background_interval: DEFAULT_BACKGROUND_INTERVAL,
            hooks: SessionHooks::default(),
        }
    }
}

impl SessionOptions {
    pub fn handler(mut self, handler: impl RefreshHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn background_interval(mut self, interval: Duration) -> Self {
        self.background_interval = interval;
        self
    }

    pub fn on_refresh_start<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_refresh_start = Some(Arc::new(hook));
        self
    }

    pub fn on_refresh_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<&TokenSet>) + Send + Sync + 'static,
    {
        self.hooks.on_refresh_success = Some(Arc::new(hook));
        self
    }

    pub fn on_refresh_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AuthError) + Send + Sync + 'static,
    {
        self.hooks.on_refresh_error = Some(Arc::new(hook));
        self
    }
}

/// Decides when to refresh and guarantees at most one refresh in flight.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: TokenStore,
    handler: Option<Arc<dyn RefreshHandler>>,
    margin: Duration,
    interval: Duration,
    hooks: SessionHooks,
    in_flight: Mutex<Option<(u64, SharedRefresh)>>,
    next_flight: AtomicU64,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let task = self
            .background
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl SessionManager {
    pub fn new(store: TokenStore, options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                handler: options.handler,
                margin: options.refresh_margin,
                interval: if options.background_interval.is_zero() {
                    MIN_BACKGROUND_INTERVAL
                } else {
                    options.background_interval
                },
                hooks: options.hooks,
                in_flight: Mutex::new(None),
                next_flight: AtomicU64::new(0),
                background: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn refresh_margin(&self) -> Duration {
        self.inner.margin
    }

    pub fn has_refresh_handler(&self) -> bool {
        self.inner.handler.is_some()
    }

    pub async fn get_token_set(&self) -> Option<TokenSet> {
        self.inner.store.get().await
    }

    pub async fn set_token_set(&self, tokens: Option<TokenSet>) {
        self.inner.store.set(tokens).await
    }

    pub async fn update_token_set(&self, patch: TokenSetPatch) -> Option<TokenSet> {
        self.inner.store.update(patch).await
    }

    /// Current access token. Never triggers a refresh.
    pub async fn get_access_token(&self) -> Option<String> {
        self.inner
            .store
            .get()
            .await
            .and_then(|t| t.access_token().map(String::from))
    }

    /// A currently-valid access token, refreshing first if the stored one is
    /// expired or within the refresh margin.
    pub async fn ensure_fresh_token(&self) -> Result<Option<String>, AuthError> {
        let current = self.inner.store.get().await;
        if self.inner.handler.is_none() || !self.is_expired(None) {
            return Ok(current.and_then(|t| t.access_token().map(String::from)));
        }

        // Another caller's refresh may have landed since the check above.
        let Some(flight) = self.join_or_start_refresh(false) else {
            return Ok(self.get_access_token().await);
        };
        tracing::debug!("Access token due for refresh");
        let refreshed = flight.await?;
        match refreshed.as_ref().and_then(TokenSet::access_token) {
            Some(token) => Ok(Some(token.to_string())),
            None => Ok(self.get_access_token().await),
        }
    }

    /// Refresh regardless of expiry, joining any refresh already in flight.
    /// Without a handler this returns the stored set and calls nothing.
    pub async fn refresh(&self) -> Result<Option<TokenSet>, AuthError> {
        if self.inner.handler.is_none() {
            return Ok(self.inner.store.get().await);
        }
        match self.join_or_start_refresh(true) {
            Some(flight) => flight.await,
            None => Ok(self.inner.store.get().await),
        }
    }

    /// Clear the store and stop the background timer.
    pub async fn clear(&self) {
        self.stop_background_refresh();
        self.inner.store.clear().await;
    }

    /// Expiry check; `grace` defaults to the refresh margin.
    pub fn is_expired(&self, grace: Option<Duration>) -> bool {
        self.inner.store.is_expired(grace.unwrap_or(self.inner.margin))
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Start the periodic refresh check. Calling it again while running is a
    /// no-op. Must be called inside a tokio runtime.
    pub fn start_background_refresh(&self) {
        let mut slot = self
            .inner
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.interval;
        tracing::debug!("Starting background refresh every {:?}", interval);
        *slot = Some(tokio::spawn(background_loop(weak, interval)));
    }

    /// Cancel future ticks. An in-flight refresh is not interrupted.
    pub fn stop_background_refresh(&self) {
        let task = self
            .inner
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            tracing::debug!("Stopping background refresh");
            task.abort();
        }
    }

    pub fn is_background_refresh_running(&self) -> bool {
        self.inner
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Join the flight in progress, or start one. Unless `force` is set, a
    /// new flight is only started if the token is still due, checked under
    /// the slot lock.
    fn join_or_start_refresh(&self, force: bool) -> Option<SharedRefresh> {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some((_, flight)) = slot.as_ref() {
            tracing::debug!("Joining in-flight token refresh");
            return Some(flight.clone());
        }
        if !force && !self.is_expired(None) {
            return None;
        }

        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel::<RefreshResult>();
        let flight = rx
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(AuthError::refresh_failed(anyhow::anyhow!(
                        "refresh task ended without a result"
                    )))
                })
            })
            .boxed()
            .shared();
        *slot = Some((id, flight.clone()));
        drop(slot);

        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        tokio::spawn(async move {
            let result = guard.inner.run_refresh().await;
            drop(guard);
            let _ = tx.send(result);
        });
        Some(flight)
    }
}

/// Releases the in-flight slot when the refresh task ends, however it ends.
struct FlightGuard {
    inner: Arc<ManagerInner>,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.finish_flight(self.id);
    }
}

impl ManagerInner {
    async fn run_refresh(&self) -> RefreshResult {
        let Some(handler) = self.handler.as_ref() else {
            return Ok(self.store.get().await);
        };

        if let Some(hook) = &self.hooks.on_refresh_start {
            hook();
        }

        let current = self.store.get().await;
        let outcome = match handler.refresh(current).await {
            Ok(RefreshOutcome::Replaced(tokens)) if !tokens.has_access_token() => Err(
                AuthError::refresh_failed(anyhow::anyhow!("refresh returned no access token")),
            ),
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(AuthError::refresh_failed(e)),
        };

        match outcome {
            Ok(outcome) => {
                match outcome {
                    RefreshOutcome::Replaced(tokens) => {
                        self.store.set(Some(tokens)).await;
                        tracing::info!("Access token refreshed");
                    }
                    RefreshOutcome::Cleared => {
                        self.store.set(None).await;
                        tracing::info!("Refresh handler cleared the session");
                    }
                    RefreshOutcome::Unchanged => {
                        tracing::debug!("Refresh handler returned no new tokens");
                    }
                }
                let tokens = self.store.get().await;
                if let Some(hook) = &self.hooks.on_refresh_success {
                    hook(tokens.as_ref());
                }
                Ok(tokens)
            }
            Err(err) => {
                tracing::warn!("{}", err);
                if let Some(hook) = &self.hooks.on_refresh_error {
                    hook(&err);
                }
                Err(err)
            }
        }
    }

    fn finish_flight(&self, id: u64) {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            *slot = None;
        }
    }
}

async fn background_loop(weak: Weak<ManagerInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; check on start.
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        let manager = SessionManager { inner };
        if !manager.has_refresh_handler() || !manager.is_expired(None) {
            continue;
        }
        let Some(flight) = manager.join_or_start_refresh(false) else {
            continue;
        };
        tracing::debug!("Background refresh tick: token due");
        // Failures already reached the error hook; keep ticking.
        if let Err(e) = flight.await {
            tracing::debug!("Background refresh failed: {}", e);
        }
    }
}
