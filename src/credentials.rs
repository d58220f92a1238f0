//! Login ticket credentials and the process-wide credential cache.
//!
//! WSAA tickets are costly and rate-limited to obtain, and the authority
//! rejects a login while a previously issued ticket is still valid. The cache
//! therefore enforces *single-flight* per [`CacheKey`]: among any number of
//! concurrent callers needing credentials for one identity/environment pair,
//! exactly one authentication call reaches the authority and every other
//! caller attaches to that pending flight.
//!
//! ```text
//! caller ──► get(key)            valid entry? ──► return it
//!              │ miss/expired
//!              ▼
//!            in-flight table     flight pending? ──► await the shared future
//!              │ none
//!              ▼
//!            spawn authenticate  (detached: an abandoned caller cannot
//!              │                  cancel it; the result still lands in
//!              ▼                  the cache for later callers)
//!            store entry, resolve all waiters
//! ```
//!
//! The cache is an explicit value owned by the application's composition
//! root, shared by reference with every consumer. It starts empty and has no
//! teardown; entries simply expire.

use std::{collections::HashMap, fmt, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::Mode,
    error::{AfipError, Result},
};

/// Default safety margin subtracted from a ticket's lifetime.
///
/// Absorbs clock skew between this process and the authority plus the
/// latency of an in-flight business call made just before expiry.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(300);

/// Cache key: one process may hold tickets for several identity/environment
/// combinations at once, and they never alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Signing identity's tax id.
    pub cuit: u64,
    /// Target environment.
    pub mode: Mode,
}

/// A WSAA login ticket: token/sign pair plus its expiry.
///
/// Replaced wholesale on refresh, never mutated in place. `Debug` redacts the
/// token and sign so credentials cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Opaque session token.
    pub token: String,
    /// Signature the authority issued alongside the token.
    pub sign: String,
    /// Instant after which the authority no longer honors this ticket.
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    /// Returns `true` while `expires_at − now > margin`.
    #[must_use]
    pub fn is_valid(&self, margin: Duration) -> bool {
        match chrono::Duration::from_std(margin) {
            Ok(m) => self.expires_at - Utc::now() > m,
            Err(_) => false,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("sign", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

type AuthFlight = Shared<BoxFuture<'static, Result<Credentials>>>;

#[derive(Default)]
struct CacheInner {
    entries: Mutex<HashMap<CacheKey, Credentials>>,
    in_flight: Mutex<HashMap<CacheKey, AuthFlight>>,
}

/// Process-wide store of login tickets keyed by (cuit, mode).
///
/// All methods take `&self`; consumers share the cache via `Arc`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use afip_ws::credentials::{CacheKey, CredentialCache, Credentials};
/// use afip_ws::config::Mode;
/// use chrono::{Duration as ChronoDuration, Utc};
///
/// let cache = CredentialCache::new();
/// let key = CacheKey { cuit: 20111111112, mode: Mode::Sandbox };
/// assert!(cache.get(&key).is_none());
///
/// // Operator recovery: install a ticket recorded out of band.
/// cache.populate(key, Credentials {
///     token: "token".to_owned(),
///     sign: "sign".to_owned(),
///     expires_at: Utc::now() + ChronoDuration::hours(12),
/// });
/// assert!(cache.get(&key).is_some());
/// ```
pub struct CredentialCache {
    inner: Arc<CacheInner>,
    safety_margin: Duration,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialCache {
    /// Creates an empty cache with [`DEFAULT_SAFETY_MARGIN`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_safety_margin(DEFAULT_SAFETY_MARGIN)
    }

    /// Creates an empty cache with an explicit safety margin.
    #[must_use]
    pub fn with_safety_margin(safety_margin: Duration) -> Self {
        Self { inner: Arc::new(CacheInner::default()), safety_margin }
    }

    /// Non-blocking lookup. Never triggers network I/O; an expired entry is
    /// treated as absent.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Credentials> {
        self.inner
            .entries
            .lock()
            .get(key)
            .filter(|c| c.is_valid(self.safety_margin))
            .cloned()
    }

    /// Unconditional manual override.
    ///
    /// Operator-driven recovery path: when the process cache was lost but the
    /// authority still considers a prior ticket live, a fresh login would be
    /// rejected as a duplicate. Installing the previously recorded ticket
    /// here gets business calls flowing again.
    pub fn populate(&self, key: CacheKey, credentials: Credentials) {
        info!(cuit = key.cuit, mode = ?key.mode, expires_at = %credentials.expires_at,
            "manually populating credential cache");
        self.inner.entries.lock().insert(key, credentials);
    }

    /// Explicit eviction, used after an authentication-related rejection on a
    /// business call so the next attempt re-authenticates instead of reusing
    /// a rejected token.
    pub fn invalidate(&self, key: &CacheKey) {
        warn!(cuit = key.cuit, mode = ?key.mode, "invalidating cached credentials");
        self.inner.entries.lock().remove(key);
    }

    /// Returns valid credentials for `key`, authenticating at most once.
    ///
    /// If no valid entry exists, exactly one caller triggers `authenticate`;
    /// all concurrent callers for the same key await that one result, success
    /// or failure. The flight runs on a spawned task, so dropping a waiting
    /// caller does not cancel it: the ticket still lands in the cache for
    /// later callers. A failed flight is cleared once settled, so the next
    /// call starts a fresh attempt.
    ///
    /// # Errors
    ///
    /// Propagates the authentication error shared by the flight, or
    /// [`AfipError::Transport`] if the flight's task was aborted.
    pub async fn get_or_authenticate<F, Fut>(&self, key: CacheKey, authenticate: F) -> Result<Credentials>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Credentials>> + Send + 'static,
    {
        if let Some(credentials) = self.get(&key) {
            return Ok(credentials);
        }

        let flight = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(existing) = in_flight.get(&key) {
                debug!(cuit = key.cuit, mode = ?key.mode, "attaching to in-flight authentication");
                existing.clone()
            } else if let Some(credentials) = self.get(&key) {
                // A flight completed between the fast-path check and taking
                // the in-flight lock.
                return Ok(credentials);
            } else {
                let flight = self.start_flight(key, authenticate());
                in_flight.insert(key, flight.clone());
                self.spawn_flight_cleanup(key, flight.clone());
                flight
            }
        };

        flight.await
    }

    fn start_flight<Fut>(&self, key: CacheKey, authenticate: Fut) -> AuthFlight
    where
        Fut: Future<Output = Result<Credentials>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let credentials = authenticate.await?;
            // Entries are replaced atomically under the map lock: readers see
            // either the previous complete value or this one.
            inner.entries.lock().insert(key, credentials.clone());
            Ok(credentials)
        });

        async move {
            handle
                .await
                .map_err(|e| AfipError::Transport(format!("authentication task aborted: {e}")))?
        }
        .boxed()
        .shared()
    }

    /// Removes the in-flight slot once the flight settles. Guarded by future
    /// identity so a newer flight started for the same key is never evicted
    /// by a stale cleanup.
    fn spawn_flight_cleanup(&self, key: CacheKey, flight: AuthFlight) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _ = flight.clone().await;
            let mut in_flight = inner.in_flight.lock();
            if in_flight.get(&key).is_some_and(|current| flight.ptr_eq(current)) {
                in_flight.remove(&key);
            }
        });
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("entries", &self.inner.entries.lock().len())
            .field("safety_margin", &self.safety_margin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as ChronoDuration;

    use super::*;

    fn key() -> CacheKey {
        CacheKey { cuit: 20_111_111_112, mode: Mode::Sandbox }
    }

    fn credentials_expiring_in(duration: ChronoDuration) -> Credentials {
        Credentials {
            token: "tok".to_owned(),
            sign: "sig".to_owned(),
            expires_at: Utc::now() + duration,
        }
    }

    #[test]
    fn test_get_on_empty_cache_is_absent() {
        let cache = CredentialCache::new();
        assert!(cache.get(&key()).is_none());
    }

    #[test]
    fn test_entry_within_safety_margin_is_absent() {
        // Expires in 60s but margin is 300s: treated as absent.
        let cache = CredentialCache::new();
        cache.populate(key(), credentials_expiring_in(ChronoDuration::seconds(60)));
        assert!(cache.get(&key()).is_none());
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let cache = CredentialCache::with_safety_margin(Duration::ZERO);
        cache.populate(key(), credentials_expiring_in(ChronoDuration::seconds(-1)));
        assert!(cache.get(&key()).is_none());
    }

    #[test]
    fn test_populate_overwrites() {
        let cache = CredentialCache::new();
        cache.populate(key(), credentials_expiring_in(ChronoDuration::hours(1)));
        let replacement = Credentials {
            token: "new-token".to_owned(),
            sign: "new-sign".to_owned(),
            expires_at: Utc::now() + ChronoDuration::hours(12),
        };
        cache.populate(key(), replacement.clone());
        assert_eq!(cache.get(&key()), Some(replacement));
    }

    #[test]
    fn test_invalidate_then_get_is_absent() {
        let cache = CredentialCache::new();
        cache.populate(key(), credentials_expiring_in(ChronoDuration::hours(12)));
        cache.invalidate(&key());
        assert!(cache.get(&key()).is_none());
    }

    #[test]
    fn test_keys_are_independent() {
        let cache = CredentialCache::new();
        let sandbox = CacheKey { cuit: 20_111_111_112, mode: Mode::Sandbox };
        let production = CacheKey { cuit: 20_111_111_112, mode: Mode::Production };
        cache.populate(sandbox, credentials_expiring_in(ChronoDuration::hours(12)));
        assert!(cache.get(&sandbox).is_some());
        assert!(cache.get(&production).is_none());
        cache.invalidate(&sandbox);
        assert!(cache.get(&sandbox).is_none());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let creds = credentials_expiring_in(ChronoDuration::hours(1));
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("tok"));
        assert!(!rendered.contains("sig"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_authentication() {
        let cache = CredentialCache::new();
        cache.populate(key(), credentials_expiring_in(ChronoDuration::hours(12)));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let credentials = cache
            .get_or_authenticate(key(), move || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Credentials {
                    token: "fresh".to_owned(),
                    sign: "fresh".to_owned(),
                    expires_at: Utc::now() + ChronoDuration::hours(12),
                })
            })
            .await
            .unwrap();

        assert_eq!(credentials.token, "tok");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_flight() {
        let cache = Arc::new(CredentialCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_authenticate(key(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Give the other callers time to attach.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Credentials {
                            token: "shared".to_owned(),
                            sign: "shared".to_owned(),
                            expires_at: Utc::now() + ChronoDuration::hours(12),
                        })
                    })
                    .await
            }));
        }

        for task in tasks {
            let credentials = task.await.unwrap().unwrap();
            assert_eq!(credentials.token, "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one authentication call");
    }

    #[tokio::test]
    async fn test_failed_flight_shares_error_then_allows_retry() {
        let cache = Arc::new(CredentialCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let first = cache
            .get_or_authenticate(key(), move || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Err(AfipError::Transport("connection refused".to_owned()))
            })
            .await;
        assert!(matches!(first, Err(AfipError::Transport(_))));
        assert!(cache.get(&key()).is_none(), "failure must not populate the cache");

        // Let the cleanup task clear the settled flight.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let calls_clone = Arc::clone(&calls);
        let second = cache
            .get_or_authenticate(key(), move || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(credentials_expiring_in(ChronoDuration::hours(12)))
            })
            .await;
        assert!(second.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_single_reauthentication() {
        let cache = Arc::new(CredentialCache::with_safety_margin(Duration::ZERO));
        cache.populate(key(), credentials_expiring_in(ChronoDuration::seconds(-1)));
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let credentials = cache
            .get_or_authenticate(key(), move || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Credentials {
                    token: "renewed".to_owned(),
                    sign: "renewed".to_owned(),
                    expires_at: Utc::now() + ChronoDuration::hours(12),
                })
            })
            .await
            .unwrap();

        assert_eq!(credentials.token, "renewed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&key()).map(|c| c.token), Some("renewed".to_owned()));
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_flight() {
        let cache = Arc::new(CredentialCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let cache_clone = Arc::clone(&cache);
        let calls_clone = Arc::clone(&calls);
        let waiter = tokio::spawn(async move {
            cache_clone
                .get_or_authenticate(key(), move || async move {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(credentials_expiring_in(ChronoDuration::hours(12)))
                })
                .await
        });

        // Abandon the caller mid-flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();

        // The detached flight still completes and populates the cache.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get(&key()).is_some());
    }
}
