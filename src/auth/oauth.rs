//! OAuth2 refresh_token grant as a session refresh handler

use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, Scope, TokenResponse, TokenUrl};

use super::clock::{Clock, SystemClock};
use super::session::{RefreshHandler, RefreshOutcome};
use super::tokens::{TokenScope, TokenSet};
use crate::config::OAuthConfig;

/// Build the OAuth2 client from the configured endpoints
fn build_client(oauth: &OAuthConfig) -> Result<BasicClient> {
    let auth_url = AuthUrl::new(oauth.authorize_url.clone()).context("Invalid authorize_url")?;
    let token_url = TokenUrl::new(oauth.token_url.clone()).context("Invalid token_url")?;

    Ok(BasicClient::new(
        ClientId::new(oauth.client_id.clone()),
        oauth.client_secret.clone().map(ClientSecret::new),
        auth_url,
        Some(token_url),
    ))
}

/// Exchanges the stored refresh token for a new token set.
#[derive(Clone)]
pub struct OAuthRefresher {
    client: BasicClient,
    scopes: Vec<String>,
}

impl OAuthRefresher {
    pub fn new(oauth: &OAuthConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(oauth)?,
            scopes: oauth.scopes.clone(),
        })
    }

    async fn exchange(self, current: Option<TokenSet>) -> Result<RefreshOutcome> {
        let Some(current) = current else {
            bail!("No session to refresh. Run 'campus set' first.");
        };
        let Some(refresh_token) = current.refresh_token.clone() else {
            bail!("No refresh token available. Run 'campus set' with --refresh-token.");
        };

        tracing::info!("Refreshing access token...");

        let refresh_token = RefreshToken::new(refresh_token);
        let mut request = self.client.exchange_refresh_token(&refresh_token);
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let response = request
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .context("Failed to refresh access token")?;

        Ok(RefreshOutcome::Replaced(token_set_from_response(
            &response,
            &current,
            SystemClock.now_ms(),
        )))
    }
}

impl RefreshHandler for OAuthRefresher {
    fn refresh(
        &self,
        current: Option<TokenSet>,
    ) -> BoxFuture<'static, anyhow::Result<RefreshOutcome>> {
        self.clone().exchange(current).boxed()
    }
}

/// Map a token endpoint response onto a token set. The previous refresh
/// token and metadata carry over when the server does not rotate them.
fn token_set_from_response(
    response: &BasicTokenResponse,
    previous: &TokenSet,
    now_ms: i64,
) -> TokenSet {
    let expires_in = response.expires_in().map(|d| d.as_secs());
    TokenSet {
        access_token: Some(response.access_token().secret().to_string()),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().to_string())
            .or_else(|| previous.refresh_token.clone()),
        id_token: previous.id_token.clone(),
        token_type: previous.token_type.clone(),
        scope: response
            .scopes()
            .map(|scopes| TokenScope::Many(scopes.iter().map(|s| s.to_string()).collect()))
            .or_else(|| previous.scope.clone()),
        expires_at: None,
        expires_in,
        issued_at: expires_in.map(|_| now_ms),
        metadata: previous.metadata.clone(),
    }
}
