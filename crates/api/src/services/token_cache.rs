//! Cache for the identity provider's management API access token.
//!
//! Readers take a shared lock on the fast path. Refreshes are single-flight:
//! concurrent callers that find the token stale queue on an async mutex and
//! the first one through fetches; the rest reuse its result.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::services::{Clock, ProviderError};
use tokio::sync::Mutex;
use tracing::debug;

/// A freshly issued access token and its advertised lifetime.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

/// Where tokens come from, e.g. a client-credentials grant.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<IssuedToken, ProviderError>;
}

/// Share of a token's lifetime after which it is replaced.
const REFRESH_AT_FRACTION: f64 = 0.95;

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    refresh_at: DateTime<Utc>,
}

pub struct ManagementTokenCache<S> {
    source: S,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
}

impl<S: TokenSource> ManagementTokenCache<S> {
    pub fn new(source: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns a token with more than 5% of its lifetime left, fetching one
    /// if needed.
    pub async fn get(&self) -> Result<String, ProviderError> {
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Someone else may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        self.fetch_and_store().await
    }

    /// Replaces `rejected` after the provider refused it, regardless of its
    /// age. When another caller already replaced it, the newer cached token
    /// is returned without a fetch.
    pub async fn refresh(&self, rejected: &str) -> Result<String, ProviderError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(token) = self.fresh_token().filter(|token| token != rejected) {
            return Ok(token);
        }

        self.fetch_and_store().await
    }

    pub fn invalidate(&self) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn fresh_token(&self) -> Option<String> {
        let now = self.clock.now();
        let cached = self.cached.read().unwrap_or_else(|e| e.into_inner());
        cached
            .as_ref()
            .filter(|token| now < token.refresh_at)
            .map(|token| token.access_token.clone())
    }

    async fn fetch_and_store(&self) -> Result<String, ProviderError> {
        let issued = self.source.fetch_token().await?;

        let usable = issued.expires_in.mul_f64(REFRESH_AT_FRACTION);
        let refresh_at = self.clock.now()
            + chrono::Duration::from_std(usable).unwrap_or_else(|_| chrono::Duration::zero());

        debug!(
            expires_in_secs = issued.expires_in.as_secs(),
            refresh_at = %refresh_at,
            "Management token refreshed"
        );

        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(CachedToken {
            access_token: issued.access_token.clone(),
            refresh_at,
        });

        Ok(issued.access_token)
    }
}
