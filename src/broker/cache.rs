//! Single-flight cache for the upstream access token
//!
//! Reads take the `RwLock` briefly. A caller that finds the cache empty or
//! expired takes the refresh lock, re-checks, and only then issues; callers
//! queued behind it see the freshly stored token and return without a
//! second upstream call.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Upper bound on a cached lifetime, guards `Instant` arithmetic against
/// absurd `expires_in` values
const MAX_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Default)]
pub struct TokenCache {
    slot: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token if present and not yet expired
    pub async fn get(&self) -> Option<String> {
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|cached| cached.is_valid())
            .map(|cached| cached.token.clone())
    }

    /// Return the cached token or run `issue` to obtain a new one.
    ///
    /// `issue` yields the token and its lifetime. At most one `issue` runs at
    /// a time; on error nothing is stored.
    pub async fn get_or_refresh<F, Fut, E>(&self, issue: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration), E>>,
    {
        if let Some(token) = self.get().await {
            tracing::debug!("Using cached upstream access token");
            return Ok(token);
        }

        let _refreshing = self.refresh.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(token) = self.get().await {
            tracing::debug!("Upstream access token refreshed by concurrent request");
            return Ok(token);
        }

        let (token, lifetime) = issue().await?;
        let expires_at = Instant::now() + lifetime.min(MAX_LIFETIME);

        *self.slot.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        Ok(token)
    }

    /// Drop the cached token if it is still `rejected`.
    ///
    /// A token refreshed by another request since the rejection is kept.
    pub async fn invalidate(&self, rejected: &str) {
        let mut slot = self.slot.write().await;
        if slot.as_ref().is_some_and(|cached| cached.token == rejected) {
            *slot = None;
            tracing::info!(event = "token_cache_invalidated", "Cleared rejected access token");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn issue_counted(
        calls: &AtomicUsize,
        lifetime: Duration,
    ) -> Result<(String, Duration), String> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((format!("token-{}", n), lifetime))
    }

    #[tokio::test]
    async fn test_empty_cache_issues_once_then_hits() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_refresh(|| issue_counted(&calls, Duration::from_secs(60)))
            .await
            .unwrap();
        let second = cache
            .get_or_refresh(|| issue_counted(&calls, Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(first, "token-1");
        assert_eq!(second, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_never_returned() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_refresh(|| issue_counted(&calls, Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(cache.get().await, None);

        let next = cache
            .get_or_refresh(|| issue_counted(&calls, Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(next, "token-2");
    }

    #[tokio::test]
    async fn test_failed_issue_stores_nothing() {
        let cache = TokenCache::new();

        let result: Result<String, String> = cache
            .get_or_refresh(|| async { Err("rejected".to_string()) })
            .await;

        assert!(result.is_err());
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test]
    async fn test_invalidate_only_clears_matching_token() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);
        cache
            .get_or_refresh(|| issue_counted(&calls, Duration::from_secs(60)))
            .await
            .unwrap();

        cache.invalidate("some-older-token").await;
        assert_eq!(cache.get().await.as_deref(), Some("token-1"));

        cache.invalidate("token-1").await;
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_issue() {
        let cache = Arc::new(TokenCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        issue_counted(&calls, Duration::from_secs(60)).await
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
