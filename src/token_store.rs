//! Shared bearer-token cache for authenticated API calls.
//!
//! Tokens issued by `/auth` are valid for 24 hours; this cache keeps them
//! per app id for slightly less than that, so a token is always replaced
//! before the vendor expires it. Clients clone the store freely; clones
//! share one `Arc<RwLock<..>>`, letting a whole process reuse a single
//! token per application.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use tokio::sync::RwLock;

use crate::auth;
use crate::types::{ApiResponse, AuthData, UniPushConfig, codes};

/// Just under the vendor's 24h token lifetime.
const TOKEN_TTL: Duration = Duration::from_secs(86_300);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    fetched_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < TOKEN_TTL
    }
}

/// Token cache keyed by app id, shared across all client clones.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<HashMap<String, CachedToken>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token for `app_id`, if it has not outlived its TTL
    /// (fast path, read lock).
    pub async fn get_valid(&self, app_id: &str) -> Option<String> {
        let map = self.inner.read().await;
        map.get(app_id)
            .filter(|token| token.is_fresh())
            .map(|token| token.value.clone())
    }

    /// Fetch a fresh token via `/auth` and cache it (slow path, write lock).
    ///
    /// The write lock is held across the network call and double-checked on
    /// entry: when several callers miss at once, only the first reaches the
    /// vendor and the rest reuse its result.
    pub async fn refresh(
        &self,
        http: &Client,
        base_url: &str,
        config: &UniPushConfig,
    ) -> Result<String> {
        let mut map = self.inner.write().await;

        // Double-check: another caller may have refreshed while we waited
        if let Some(token) = map.get(&config.app_id).filter(|token| token.is_fresh()) {
            tracing::debug!(app_id = %config.app_id, "token already refreshed by another caller");
            return Ok(token.value.clone());
        }

        tracing::debug!(app_id = %config.app_id, "requesting fresh token");
        let response = http
            .post(format!("{}/auth", base_url))
            .json(&auth::auth_body(config))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("auth request failed: {} {}", status, body);
        }

        let envelope: ApiResponse =
            serde_json::from_str(&body).context("malformed auth response")?;
        if envelope.code != codes::SUCCESS {
            anyhow::bail!(
                "auth rejected: code {} ({})",
                envelope.code,
                envelope.msg.unwrap_or_default()
            );
        }

        let data: AuthData = serde_json::from_value(
            envelope
                .data
                .ok_or_else(|| anyhow!("auth response missing data"))?,
        )
        .context("malformed auth payload")?;

        tracing::info!(app_id = %config.app_id, "token refreshed");
        map.insert(
            config.app_id.clone(),
            CachedToken {
                value: data.token.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(data.token)
    }

    /// Drop the cached token for `app_id`.
    ///
    /// Called when the API answers with [`codes::TOKEN_INVALID`] so the
    /// retry re-authenticates from scratch.
    pub async fn invalidate(&self, app_id: &str) {
        let mut map = self.inner.write().await;
        if map.remove(app_id).is_some() {
            tracing::debug!(app_id = %app_id, "invalidated cached token");
        }
    }
}
