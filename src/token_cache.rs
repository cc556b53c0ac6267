use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::Token;
use crate::Error;

/// The access token of one credential plus the policy deciding when to refresh it
///
/// A refresh is due when no token is cached or when `now + eager_refresh_threshold` has
/// reached the token's expiry. Tokens without an expiry never become due.
#[derive(Debug)]
pub(crate) struct TokenCache {
    token: RwLock<Option<Arc<Token>>>,
    eager_refresh_threshold: Duration,
}

impl TokenCache {
    pub(crate) fn new(eager_refresh_threshold: Duration) -> Self {
        Self {
            token: RwLock::new(None),
            eager_refresh_threshold,
        }
    }

    pub(crate) fn eager_refresh_threshold(&self) -> Duration {
        self.eager_refresh_threshold
    }

    pub(crate) fn needs_refresh(&self, token: Option<&Token>, now: DateTime<Utc>) -> bool {
        let Some(token) = token else {
            return true;
        };

        let Some(expires_at) = token.expires_at() else {
            return false;
        };

        // A threshold beyond the representable range makes every token due
        TimeDelta::from_std(self.eager_refresh_threshold)
            .ok()
            .and_then(|threshold| now.checked_add_signed(threshold))
            .map_or(true, |refresh_at| refresh_at >= expires_at)
    }

    /// Return the cached token, running `refresh` first if one is due
    ///
    /// Concurrent callers that find a refresh due wait for the one refresh in flight instead
    /// of starting their own. A failed refresh leaves the previous token in place.
    pub(crate) async fn get_or_refresh<F, Fut>(
        &self,
        now: impl Fn() -> DateTime<Utc>,
        refresh: F,
    ) -> Result<Arc<Token>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Token, Error>>,
    {
        if let Some(token) = self.token.read().await.as_ref() {
            if !self.needs_refresh(Some(token), now()) {
                return Ok(token.clone());
            }
        }

        let mut locked = self.token.write().await;
        // Check if refresh happened while we were waiting.
        if let Some(token) = locked.as_ref() {
            if !self.needs_refresh(Some(token), now()) {
                return Ok(token.clone());
            }
        }

        debug!("refreshing access token");
        let token = Arc::new(refresh().await?);
        *locked = Some(token.clone());
        Ok(token)
    }

    #[cfg(test)]
    pub(crate) async fn set(&self, token: Token) {
        *self.token.write().await = Some(Arc::new(token));
    }
}
