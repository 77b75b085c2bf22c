//! Session error taxonomy

use std::error::Error as StdError;
use std::sync::Arc;

/// Errors raised by the session layer.
///
/// Clone so one refresh outcome can be handed to every caller joined on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No access token available and empty headers are not permitted.
    #[error("missing access token")]
    MissingAccessToken,

    /// The refresh handler failed or returned an unusable token set.
    #[error("token refresh failed: {cause}")]
    RefreshFailed {
        #[source]
        cause: Arc<dyn StdError + Send + Sync>,
    },

    /// Header name or value cannot be encoded.
    #[error("invalid authorization header: {0}")]
    InvalidHeader(String),
}

impl AuthError {
    /// Wrap a handler failure, passing existing `RefreshFailed` errors through.
    pub fn refresh_failed(err: anyhow::Error) -> Self {
        match err.downcast::<AuthError>() {
            Ok(e @ AuthError::RefreshFailed { .. }) => e,
            Ok(other) => Self::RefreshFailed {
                cause: Arc::new(other),
            },
            Err(err) => {
                let boxed: Box<dyn StdError + Send + Sync> = err.into();
                Self::RefreshFailed {
                    cause: Arc::from(boxed),
                }
            }
        }
    }

    pub fn is_refresh_failed(&self) -> bool {
        matches!(self, AuthError::RefreshFailed { .. })
    }
}
