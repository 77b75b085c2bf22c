//! CLI command implementations

use std::time::Duration;

use anyhow::{Context, Result};
use campus_sdk::api;
use campus_sdk::auth::{AuthHeaderResolver, Clock, SessionManager, SystemClock, TokenSet};
use campus_sdk::Config;

fn describe_expiry(tokens: &TokenSet) -> String {
    match tokens.expiry_ms() {
        Some(exp) => {
            let left = (exp - SystemClock.now_ms()) / 1000;
            match chrono::DateTime::from_timestamp_millis(exp) {
                Some(at) => format!("{} ({}s left)", at.to_rfc3339(), left),
                None => format!("{} ({}s left)", exp, left),
            }
        }
        None => "never".to_string(),
    }
}

/// Display current session status
pub async fn status(session: &SessionManager) -> Result<()> {
    match session.get_token_set().await {
        Some(tokens) if tokens.has_access_token() => {
            let state = if session.is_expired(Some(Duration::ZERO)) {
                "expired"
            } else if session.is_expired(None) {
                "due for refresh"
            } else {
                "valid"
            };
            println!("Access token:  {}", state);
            println!("  type:        {}", tokens.token_type());
            println!("  expires:     {}", describe_expiry(&tokens));
            if let Some(scope) = &tokens.scope {
                println!("  scope:       {}", scope.entries().join(" "));
            }
            match tokens.refresh_token {
                Some(_) => println!("Refresh token: present"),
                None => println!("Refresh token: none"),
            }
        }
        _ => {
            println!("Access token:  none");
            println!("\nRun 'campus set --access-token <TOKEN>' to store credentials.");
        }
    }
    Ok(())
}

/// Store a token set supplied on the command line
pub async fn set(
    session: &SessionManager,
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
) -> Result<()> {
    let mut tokens = TokenSet::new(access_token).with_issued_at(SystemClock.now_ms());
    tokens.refresh_token = refresh_token;
    tokens.expires_in = expires_in;
    session.set_token_set(Some(tokens)).await;
    println!("Credentials stored.");
    Ok(())
}

/// Print a fresh access token, refreshing if due
pub async fn token(session: &SessionManager) -> Result<()> {
    let token = session
        .ensure_fresh_token()
        .await?
        .context("No access token. Run 'campus set' first.")?;
    println!("{}", token);
    Ok(())
}

/// Force a refresh
pub async fn refresh(session: &SessionManager) -> Result<()> {
    match session.refresh().await? {
        Some(tokens) => println!("Token refreshed; expires {}.", describe_expiry(&tokens)),
        None => println!("Session cleared by the token endpoint."),
    }
    Ok(())
}

/// Print the Authorization header for the next request
pub async fn header(session: &SessionManager) -> Result<()> {
    let headers = AuthHeaderResolver::new(session.clone()).resolve().await?;
    for (name, value) in &headers {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    Ok(())
}

/// Authenticated GET against the API, printing the JSON body
pub async fn get(config: &Config, session: &SessionManager, path: &str) -> Result<()> {
    let client = config.api_client(session.clone())?;
    let body = api::get_json(&client, path).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Keep the session fresh in the background until Ctrl-C
pub async fn watch(session: &SessionManager) -> Result<()> {
    let subscription = session.store().subscribe(|tokens| match tokens {
        Some(t) => tracing::info!("Session updated; expires {}", describe_expiry(t)),
        None => tracing::info!("Session cleared"),
    });

    session.start_background_refresh();
    println!("Watching session (Ctrl-C to stop)...");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    session.stop_background_refresh();
    subscription.unsubscribe();
    Ok(())
}

/// Clear stored credentials
pub async fn logout(session: &SessionManager) -> Result<()> {
    session.clear().await;
    println!("Logged out.");
    Ok(())
}
