//! Authorization header resolution for outbound requests

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use super::error::AuthError;
use super::session::SessionManager;
use super::tokens::DEFAULT_TOKEN_TYPE;

/// Produces the auth header for each request from a [`SessionManager`].
#[derive(Clone)]
pub struct AuthHeaderResolver {
    session: SessionManager,
    header: HeaderName,
    scheme: Option<String>,
    refresh_on_demand: bool,
    allow_empty: bool,
}

impl AuthHeaderResolver {
    /// `Authorization: Bearer <token>`, refreshing on demand.
    pub fn new(session: SessionManager) -> Self {
        Self {
            session,
            header: AUTHORIZATION,
            scheme: Some(DEFAULT_TOKEN_TYPE.to_string()),
            refresh_on_demand: true,
            allow_empty: false,
        }
    }

    pub fn header_name(mut self, name: &str) -> Result<Self, AuthError> {
        self.header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| AuthError::InvalidHeader(format!("bad header name {:?}", name)))?;
        Ok(self)
    }

    /// `None` sends the bare token.
    pub fn scheme(mut self, scheme: Option<&str>) -> Self {
        self.scheme = scheme.map(String::from);
        self
    }

    /// When false, only the stored token is used and no refresh is attempted.
    pub fn refresh_on_demand(mut self, enabled: bool) -> Self {
        self.refresh_on_demand = enabled;
        self
    }

    /// Send an empty header value instead of failing when no token exists.
    pub fn allow_empty(mut self, enabled: bool) -> Self {
        self.allow_empty = enabled;
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Header map for one outbound request.
    pub async fn resolve(&self) -> Result<HeaderMap, AuthError> {
        let token = if self.refresh_on_demand {
            self.session.ensure_fresh_token().await?
        } else {
            self.session.get_access_token().await
        };

        let value = match token {
            Some(token) => self.format(&token)?,
            None if self.allow_empty => HeaderValue::from_static(""),
            None => return Err(AuthError::MissingAccessToken),
        };

        let mut headers = HeaderMap::new();
        headers.insert(self.header.clone(), value);
        Ok(headers)
    }

    fn format(&self, token: &str) -> Result<HeaderValue, AuthError> {
        let raw = match self.scheme.as_deref().filter(|s| !s.is_empty()) {
            Some(scheme) => format!("{} {}", scheme, token),
            None => token.to_string(),
        };
        let mut value = HeaderValue::from_str(&raw)
            .map_err(|_| AuthError::InvalidHeader("token contains invalid characters".into()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}
