//! Access token caching and refresh
//!
//! Every API call needs a bearer token.  The [`TokenManager`] keeps the most
//! recently issued token in memory and only goes back to the authentication
//! service when that token is about to expire.  Concurrent callers that find
//! the token stale queue up behind a single refresh instead of each starting
//! their own.
use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    auth::{Authenticator, Credential, IssuedToken},
    error::{Result, ViewingError},
};

/// How long before its reported expiry a token is treated as stale
pub const SAFETY_BUFFER: Duration = Duration::from_secs(10);

/// A monotonic time source
///
/// The default, [`TokioClock`], follows tokio's clock so tests can pause and
/// advance time instead of sleeping.
pub trait Clock: std::fmt::Debug + Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct AccessToken {
    value: String,
    obtained_at: Instant,
    expires_in: Duration,
    issued_at: DateTime<Utc>,
}

impl AccessToken {
    fn new(issued: IssuedToken, obtained_at: Instant) -> Self {
        Self {
            value: issued.access_token,
            obtained_at,
            expires_in: Duration::from_secs(issued.expires_in),
            issued_at: Utc::now(),
        }
    }

    /// `None` when the lifetime is too long to represent, such a token never goes stale
    fn expires_at(&self) -> Option<Instant> {
        self.obtained_at.checked_add(self.expires_in)
    }

    fn is_fresh(&self, now: Instant) -> bool {
        match self.expires_at() {
            Some(expires_at) => expires_at
                .checked_sub(SAFETY_BUFFER)
                .map_or(false, |refresh_at| now < refresh_at),
            None => true,
        }
    }

    fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.expires_in)
            .ok()
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
    }
}

/// Supplies a valid bearer token, refreshing it when needed
///
/// At most one refresh is in flight per manager.  A failed refresh leaves the
/// cached token as it was and is reported only to the caller that attempted it;
/// the next caller tries again.
pub struct TokenManager {
    credential: Credential,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("credential", &self.credential)
            .field("authenticator", &self.authenticator)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(
        credential: Credential,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credential,
            authenticator,
            clock,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns a token that is not within [`SAFETY_BUFFER`] of expiring
    ///
    /// Errors are always [`ViewingError::Auth`] wrapping whatever went wrong
    /// while talking to the authentication service.
    pub async fn get_token(&self) -> Result<String> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Someone else may have refreshed while we waited for the lock
        if let Some(token) = self.fresh_token().await {
            debug!("access token was refreshed by a concurrent caller");
            return Ok(token);
        }
        self.refresh_locked().await
    }

    /// Fetches a new token even if the cached one is still fresh
    ///
    /// Useful after the service rejected a token that had not expired yet.
    /// On failure the cached token is kept.
    pub async fn refresh(&self) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// True if a token is cached and would be returned without a refresh
    pub async fn has_valid_token(&self) -> bool {
        self.fresh_token().await.is_some()
    }

    async fn fresh_token(&self) -> Option<String> {
        let now = self.clock.now();
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_fresh(now))
            .map(|token| token.value.clone())
    }

    // Must only be called while holding `refresh_lock`
    async fn refresh_locked(&self) -> Result<String> {
        info!(client_key = %self.credential.client_key(), "requesting new access token");
        // Measure the lifetime from before the request so the estimate errs early
        let requested_at = self.clock.now();
        let issued = match self.authenticator.authenticate(&self.credential).await {
            Ok(issued) => issued,
            Err(err) => {
                warn!(error = %err, "unable to obtain access token");
                return Err(ViewingError::auth(err));
            }
        };

        let token = AccessToken::new(issued, requested_at);
        info!(
            expires_in = token.expires_in.as_secs(),
            expires_at = ?token.expires_at_utc(),
            "retrieved new access token"
        );
        let value = token.value.clone();
        *self.cached.write().await = Some(token);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
    };

    use all_asserts::{assert_false, assert_true};
    use async_trait::async_trait;

    use super::*;

    /// Hands out scripted responses and counts how often it was asked
    #[derive(Debug, Default)]
    struct ScriptedAuthenticator {
        responses: StdMutex<VecDeque<Result<IssuedToken>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedAuthenticator {
        fn push_token(&self, token: &str, expires_in: u64) {
            self.responses.lock().unwrap().push_back(Ok(IssuedToken {
                access_token: token.to_string(),
                token_type: "Bearer".to_string(),
                expires_in,
            }));
        }

        fn push_failure(&self) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(ViewingError::remote(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    "{}",
                )));
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for ScriptedAuthenticator {
        async fn authenticate(&self, _credential: &Credential) -> Result<IssuedToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ViewingError::Decode("no scripted response".to_string())))
        }
    }

    fn manager(authenticator: Arc<ScriptedAuthenticator>) -> TokenManager {
        TokenManager::new(
            Credential::new("key", "secret"),
            authenticator,
            Arc::new(TokioClock),
        )
    }

    async fn cached_value(manager: &TokenManager) -> Option<String> {
        manager
            .cached
            .read()
            .await
            .as_ref()
            .map(|token| token.value.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_token_until_buffer() {
        let auth = Arc::new(ScriptedAuthenticator::default());
        auth.push_token("t1", 3600);
        auth.push_token("t2", 3600);
        let manager = manager(auth.clone());

        assert_eq!(manager.get_token().await.unwrap(), "t1");
        assert_eq!(auth.calls(), 1);

        tokio::time::advance(Duration::from_secs(3600 - 10 - 1)).await;
        assert_eq!(manager.get_token().await.unwrap(), "t1");
        assert_eq!(auth.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(manager.get_token().await.unwrap(), "t2");
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn short_lived_tokens_are_never_cached() {
        let auth = Arc::new(ScriptedAuthenticator::default());
        auth.push_token("t1", 5);
        auth.push_token("t2", 5);
        let manager = manager(auth.clone());

        assert_eq!(manager.get_token().await.unwrap(), "t1");
        assert_false!(manager.has_valid_token().await);
        assert_eq!(manager.get_token().await.unwrap(), "t2");
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let auth = Arc::new(ScriptedAuthenticator {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        auth.push_token("shared", 3600);
        auth.push_token("unexpected", 3600);
        let manager = Arc::new(manager(auth.clone()));

        let handles = (0..32)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_token().await })
            })
            .collect::<Vec<_>>();

        for result in futures::future::join_all(handles).await {
            assert_eq!(result.unwrap().unwrap(), "shared");
        }
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_callers_see_failed_refresh_as_their_own_attempt() {
        let auth = Arc::new(ScriptedAuthenticator {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        auth.push_failure();
        auth.push_token("t1", 3600);
        let manager = manager(auth.clone());

        let (first, second) = tokio::join!(manager.get_token(), manager.get_token());

        // The first caller's refresh failed, the second retried independently
        assert_true!(first.unwrap_err().is_auth());
        assert_eq!(second.unwrap(), "t1");
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_cached_token() {
        let auth = Arc::new(ScriptedAuthenticator::default());
        auth.push_token("t1", 3600);
        auth.push_failure();
        auth.push_failure();
        auth.push_token("t2", 3600);
        let manager = manager(auth.clone());

        assert_eq!(manager.get_token().await.unwrap(), "t1");

        // A forced refresh fails but the old token is still served
        tokio::time::advance(Duration::from_secs(100)).await;
        let err = manager.refresh().await.unwrap_err();
        assert_true!(err.is_auth());
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(manager.get_token().await.unwrap(), "t1");
        assert_eq!(auth.calls(), 2);

        // Inside the buffer but not yet expired, the refresh fails again
        tokio::time::advance(Duration::from_secs(3600 - 100 - 5)).await;
        assert_true!(manager.get_token().await.unwrap_err().is_auth());
        assert_eq!(cached_value(&manager).await.as_deref(), Some("t1"));
        {
            let cached = manager.cached.read().await;
            let expires_at = cached.as_ref().and_then(|token| token.expires_at()).unwrap();
            assert_true!(Instant::now() < expires_at);
        }

        // No failure is remembered, the next call tries again
        assert_eq!(manager.get_token().await.unwrap(), "t2");
        assert_eq!(auth.calls(), 4);
    }

    #[derive(Debug)]
    struct FixedClock(StdMutex<Instant>);

    impl Clock for FixedClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn honours_injected_clock() {
        let start = Instant::now();
        let clock = Arc::new(FixedClock(StdMutex::new(start)));
        let auth = Arc::new(ScriptedAuthenticator::default());
        auth.push_token("t1", 60);
        auth.push_token("t2", 60);
        let manager = TokenManager::new(
            Credential::new("key", "secret"),
            auth.clone(),
            clock.clone(),
        );

        assert_eq!(manager.get_token().await.unwrap(), "t1");
        assert_true!(manager.has_valid_token().await);

        *clock.0.lock().unwrap() = start + Duration::from_secs(51);
        assert_false!(manager.has_valid_token().await);
        assert_eq!(manager.get_token().await.unwrap(), "t2");
        assert_eq!(auth.calls(), 2);
    }
}
