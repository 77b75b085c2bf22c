//! Authenticated HTTP client for the Campus REST API
//!
//! Wraps reqwest::Client with per-request credential resolution. Each client
//! carries its own configuration, so clients with different credentials can
//! coexist in one process.

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::Serialize;
use url::Url;

use crate::auth::AuthHeaderResolver;

const DEFAULT_USER_AGENT: &str = concat!("campus-sdk/", env!("CARGO_PKG_VERSION"));

/// Where request credentials come from.
#[derive(Clone)]
pub enum Credentials {
    /// Anonymous requests.
    None,
    /// Fixed bearer token.
    Static(String),
    /// Resolved per request through a session, refreshing when due.
    Session(AuthHeaderResolver),
}

impl Credentials {
    async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        match self {
            Credentials::None => {}
            Credentials::Static(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("Static token contains invalid header characters")?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Credentials::Session(resolver) => {
                headers.extend(resolver.resolve().await?);
            }
        }
        Ok(headers)
    }
}

/// Explicit per-client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub credentials: Credentials,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        // Trailing slash so relative joins keep the base path.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("Invalid API base URL {}", base_url))?;
        Ok(Self {
            base_url,
            credentials,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }
}

/// Authenticated client for the REST API.
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.config
            .base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid API path {}", path))
    }

    /// Headers for one request: user agent plus resolved credentials.
    pub async fn request_headers(&self) -> Result<HeaderMap> {
        let mut headers = self.config.credentials.headers().await?;
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.config.user_agent).context("Invalid user agent")?,
        );
        Ok(headers)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        self.send(Method::GET, path, None::<&()>).await
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<reqwest::Response> {
        self.send(Method::DELETE, path, None::<&()>).await
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        let headers = self.request_headers().await?;
        tracing::debug!("{} {}", method, url);

        let mut request = self.http.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url))?;

        check_response(resp, url.as_str()).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run 'campus set' to re-authenticate.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
