//! Session token management
//!
//! A [`TokenStore`] holds the current token set, a [`SessionManager`] keeps
//! it fresh with single-flight refresh, and an [`AuthHeaderResolver`] turns
//! it into a request header.

pub mod clock;
pub mod error;
pub mod header;
pub mod oauth;
pub mod session;
pub mod storage;
pub mod store;
pub mod tokens;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AuthError;
pub use header::AuthHeaderResolver;
pub use oauth::OAuthRefresher;
pub use session::{
    RefreshHandler, RefreshOutcome, SessionHooks, SessionManager, SessionOptions,
    DEFAULT_BACKGROUND_INTERVAL, DEFAULT_REFRESH_MARGIN,
};
pub use storage::{FileStorage, MemoryStorage, StorageAdapter, StorageEvent, StorageEvents};
pub use store::{StoreOptions, Subscription, TokenStore};
pub use tokens::{TokenScope, TokenSet, TokenSetPatch};
