//! REST API access

pub mod client;

use anyhow::{Context, Result};

pub use client::{ApiClient, ClientConfig, Credentials};

/// GET a path and decode the JSON body.
pub async fn get_json(client: &ApiClient, path: &str) -> Result<serde_json::Value> {
    let resp = client.get(path).await?;
    resp.json()
        .await
        .with_context(|| format!("Failed to parse response from {}", path))
}
