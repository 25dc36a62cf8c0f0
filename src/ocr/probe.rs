//! Asset reachability probe
//!
//! A body-less request against a remote asset, made before committing to a
//! tier so an unreachable mirror fails fast instead of inside the engine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Checks that a remote asset can be fetched
#[async_trait]
pub trait AssetProbe: Send + Sync {
    /// `Ok` when reachable, otherwise a short reason
    async fn check(&self, uri: &str) -> Result<(), String>;
}

/// HEAD-request probe
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetProbe for HttpProbe {
    async fn check(&self, uri: &str) -> Result<(), String> {
        let response = self
            .client
            .head(uri)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        debug!(%uri, %status, "asset probe");
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {status}"))
        }
    }
}
