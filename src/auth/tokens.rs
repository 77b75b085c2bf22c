//! Token set value types and expiry math

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default authorization scheme when a token set carries none.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Granted scope, as returned by the server: one string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenScope {
    Single(String),
    Many(Vec<String>),
}

impl TokenScope {
    /// Individual scope entries (a single string is split on whitespace).
    pub fn entries(&self) -> Vec<&str> {
        match self {
            TokenScope::Single(s) => s.split_whitespace().collect(),
            TokenScope::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Bearer credential bundle for one authenticated session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<TokenScope>,
    /// Absolute expiry, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Relative lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Issuance time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Self::default()
        }
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn with_expires_in(mut self, secs: u64) -> Self {
        self.expires_in = Some(secs);
        self
    }

    pub fn with_expires_at(mut self, at_ms: i64) -> Self {
        self.expires_at = Some(at_ms);
        self
    }

    pub fn with_issued_at(mut self, at_ms: i64) -> Self {
        self.issued_at = Some(at_ms);
        self
    }

    /// Access token, treating an empty string as absent.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token().is_some()
    }

    pub fn token_type(&self) -> &str {
        self.token_type.as_deref().unwrap_or(DEFAULT_TOKEN_TYPE)
    }

    /// Resolved expiry: `expires_at`, else `issued_at + expires_in`, else never.
    pub fn expiry_ms(&self) -> Option<i64> {
        if let Some(at) = self.expires_at {
            return Some(at);
        }
        match (self.issued_at, self.expires_in) {
            (Some(issued), Some(secs)) => Some(issued.saturating_add(secs_to_ms(secs))),
            _ => None,
        }
    }

    /// True if unusable, or expiring at or before `now_ms + grace_ms`.
    pub fn is_expired_at(&self, now_ms: i64, grace_ms: i64) -> bool {
        if !self.has_access_token() {
            return true;
        }
        match self.expiry_ms() {
            Some(exp) => exp <= now_ms.saturating_add(grace_ms),
            None => false,
        }
    }

    /// Pin a relative lifetime to an absolute deadline, using `now_ms` when
    /// no issuance time is recorded.
    pub(crate) fn stamp_expiry(&mut self, now_ms: i64) {
        if self.expires_at.is_none() {
            if let Some(secs) = self.expires_in {
                let base = self.issued_at.unwrap_or(now_ms);
                self.expires_at = Some(base.saturating_add(secs_to_ms(secs)));
            }
        }
    }

    /// Overlay every field present in `patch`. A new relative lifetime
    /// without an absolute one restarts the clock from the patch's issuance
    /// time, or `now_ms`.
    pub(crate) fn merge(&mut self, patch: TokenSetPatch, now_ms: i64) {
        let relative_only = patch.expires_in.is_some() && patch.expires_at.is_none();

        if patch.access_token.is_some() {
            self.access_token = patch.access_token;
        }
        if patch.refresh_token.is_some() {
            self.refresh_token = patch.refresh_token;
        }
        if patch.id_token.is_some() {
            self.id_token = patch.id_token;
        }
        if patch.token_type.is_some() {
            self.token_type = patch.token_type;
        }
        if patch.scope.is_some() {
            self.scope = patch.scope;
        }
        if patch.expires_at.is_some() {
            self.expires_at = patch.expires_at;
        }
        if patch.expires_in.is_some() {
            self.expires_in = patch.expires_in;
        }
        if patch.issued_at.is_some() {
            self.issued_at = patch.issued_at;
        }
        if let Some(meta) = patch.metadata {
            self.metadata.extend(meta);
        }

        if relative_only {
            self.expires_at = None;
            let base = patch.issued_at.unwrap_or(now_ms);
            self.issued_at = Some(base);
            self.stamp_expiry(now_ms);
        }
    }
}

/// Partial token set for [`TokenStore::update`](super::TokenStore::update).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSetPatch {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<TokenScope>,
    pub expires_at: Option<i64>,
    pub expires_in: Option<u64>,
    pub issued_at: Option<i64>,
    /// Merged key-by-key into existing metadata.
    pub metadata: Option<BTreeMap<String, String>>,
}

impl TokenSetPatch {
    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            ..Self::default()
        }
    }

    pub(crate) fn into_token_set(self, now_ms: i64) -> TokenSet {
        let mut set = TokenSet::default();
        set.merge(self, now_ms);
        set
    }
}

impl From<TokenSet> for TokenSetPatch {
    fn from(t: TokenSet) -> Self {
        Self {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            id_token: t.id_token,
            token_type: t.token_type,
            scope: t.scope,
            expires_at: t.expires_at,
            expires_in: t.expires_in,
            issued_at: t.issued_at,
            metadata: (!t.metadata.is_empty()).then_some(t.metadata),
        }
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_expiry_prefers_absolute() {
        let t = TokenSet::new("a")
            .with_expires_at(NOW + 5_000)
            .with_issued_at(NOW)
            .with_expires_in(3600);
        assert_eq!(t.expiry_ms(), Some(NOW + 5_000));
    }

    #[test]
    fn test_expiry_from_issued_plus_lifetime() {
        let t = TokenSet::new("a").with_issued_at(NOW).with_expires_in(60);
        assert_eq!(t.expiry_ms(), Some(NOW + 60_000));
    }

    #[test]
    fn test_opaque_token_never_expires() {
        // Lifetime without an issuance time cannot be resolved.
        let t = TokenSet::new("a").with_expires_in(60);
        assert_eq!(t.expiry_ms(), None);
        assert!(!t.is_expired_at(NOW, 30_000));
    }

    #[test]
    fn test_missing_access_token_is_expired() {
        assert!(TokenSet::default().is_expired_at(NOW, 0));
        let mut t = TokenSet::new("");
        t.expires_at = Some(NOW + 1_000_000);
        assert!(t.is_expired_at(NOW, 0));
    }

    #[test]
    fn test_margin_boundaries() {
        let soon = TokenSet::new("a").with_expires_at(NOW + 10_000);
        assert!(soon.is_expired_at(NOW, 30_000));

        let later = TokenSet::new("a").with_expires_at(NOW + 60_000);
        assert!(!later.is_expired_at(NOW, 30_000));

        // Exactly at the boundary counts as expired.
        let edge = TokenSet::new("a").with_expires_at(NOW + 30_000);
        assert!(edge.is_expired_at(NOW, 30_000));
    }

    #[test]
    fn test_stamp_expiry_uses_now_without_issued_at() {
        let mut t = TokenSet::new("a").with_expires_in(60);
        t.stamp_expiry(NOW);
        assert_eq!(t.expires_at, Some(NOW + 60_000));

        let mut keep = TokenSet::new("a").with_expires_at(7).with_expires_in(60);
        keep.stamp_expiry(NOW);
        assert_eq!(keep.expires_at, Some(7));
    }

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let mut t = TokenSet::new("A").with_refresh_token("R");
        t.merge(TokenSetPatch::access_token("B"), NOW);
        assert_eq!(t, TokenSet::new("B").with_refresh_token("R"));
    }

    #[test]
    fn test_merge_relative_lifetime_restarts_clock() {
        let mut t = TokenSet::new("A").with_expires_at(NOW - 1);
        t.merge(
            TokenSetPatch {
                expires_in: Some(120),
                ..TokenSetPatch::default()
            },
            NOW,
        );
        assert_eq!(t.expires_at, Some(NOW + 120_000));
        assert!(!t.is_expired_at(NOW, 30_000));
    }

    #[test]
    fn test_scope_entries() {
        let single = TokenScope::Single("read write".into());
        assert_eq!(single.entries(), vec!["read", "write"]);
        let many = TokenScope::Many(vec!["a".into(), "b".into()]);
        assert_eq!(many.entries(), vec!["a", "b"]);
    }

    #[test]
    fn test_token_set_serde_skips_absent_fields() {
        let t = TokenSet::new("a").with_expires_at(NOW);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "access_token": "a", "expires_at": NOW })
        );

        let scoped: TokenSet =
            serde_json::from_value(serde_json::json!({ "access_token": "a", "scope": ["x", "y"] }))
                .unwrap();
        assert_eq!(
            scoped.scope,
            Some(TokenScope::Many(vec!["x".into(), "y".into()]))
        );
    }
}
