//! Bearer-token resolution with a short-lived session cache.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use derive_getters::Getters;
use derive_more::Display;
use derive_new::new;
use santorini_engine::UserId;
use tracing::{debug, instrument, warn};

use crate::cache::TtlLruCache;
use crate::time::Clock;

/// Result of a successful token verification.
#[derive(Debug, Clone, PartialEq, Eq, Getters, new)]
pub struct VerifiedIdentity {
    user_id: UserId,
    /// Expiry carried by the verified token, if any.
    expires_at: Option<DateTime<Utc>>,
}

/// Why a token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum AuthError {
    /// No token supplied.
    #[display("Missing bearer token")]
    MissingToken,
    /// The issuer does not recognise the token.
    #[display("Invalid token")]
    InvalidToken,
    /// The token has expired.
    #[display("Token expired")]
    Expired,
    /// The issuer could not be reached.
    #[display("Identity service unavailable: {}", _0)]
    Unavailable(String),
}

impl std::error::Error for AuthError {}

/// Identity issuance collaborator: turns a token into a verified user.
pub trait IdentityVerifier: Send + Sync + std::fmt::Debug {
    /// Verifies `token`.
    fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Verifier backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, VerifiedIdentity>,
}

impl StaticTokenVerifier {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` for `user_id`.
    pub fn with_token(
        mut self,
        token: impl Into<String>,
        user_id: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.tokens
            .insert(token.into(), VerifiedIdentity::new(user_id, expires_at));
        self
    }
}

impl IdentityVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Maps bearer tokens to user ids, caching verified results.
///
/// An entry lives for the cache TTL or until the verified token expiry,
/// whichever comes first.
#[derive(Debug)]
pub struct SessionCache {
    verifier: Arc<dyn IdentityVerifier>,
    clock: Arc<dyn Clock>,
    entries: TtlLruCache<String, UserId>,
}

impl SessionCache {
    /// Creates a cache in front of `verifier`.
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        clock: Arc<dyn Clock>,
        ttl: TimeDelta,
        capacity: usize,
    ) -> Self {
        let entries = TtlLruCache::new("sessions", ttl, capacity, clock.clone());
        Self {
            verifier,
            clock,
            entries,
        }
    }

    /// Resolves `token` to a user id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the verifier rejects the token or the
    /// verified expiry is already past.
    #[instrument(skip_all)]
    pub fn resolve(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        if let Some(user) = self.entries.get(&token.to_string()) {
            debug!(user_id = %user, "Session cache hit");
            return Ok(user);
        }

        let identity = self.verifier.verify(token)?;
        let now = self.clock.now();
        let ttl = match identity.expires_at {
            Some(expiry) if expiry <= now => {
                warn!(user_id = %identity.user_id, "Rejected expired token");
                return Err(AuthError::Expired);
            }
            Some(expiry) => (expiry - now).min(self.entries.ttl()),
            None => self.entries.ttl(),
        };
        self.entries
            .insert_with_ttl(token.to_string(), identity.user_id.clone(), ttl);
        debug!(user_id = %identity.user_id, ttl_ms = ttl.num_milliseconds(), "Session verified");
        Ok(identity.user_id)
    }

    /// Forgets a cached token.
    pub fn evict(&self, token: &str) {
        self.entries.invalidate(&token.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct CountingVerifier {
        inner: StaticTokenVerifier,
        calls: Mutex<u32>,
    }

    impl IdentityVerifier for CountingVerifier {
        fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
            *self.calls.lock().expect("lock") += 1;
            self.inner.verify(token)
        }
    }

    fn setup(expiry: Option<TimeDelta>) -> (Arc<ManualClock>, Arc<CountingVerifier>, SessionCache) {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let verifier = Arc::new(CountingVerifier {
            inner: StaticTokenVerifier::new().with_token(
                "tok",
                UserId::new("alice"),
                expiry.map(|e| start + e),
            ),
            calls: Mutex::new(0),
        });
        let cache = SessionCache::new(verifier.clone(), clock.clone(), TimeDelta::seconds(30), 16);
        (clock, verifier, cache)
    }

    #[test]
    fn test_cached_within_ttl() {
        let (clock, verifier, cache) = setup(None);
        assert_eq!(cache.resolve("tok").expect("valid"), UserId::new("alice"));
        clock.advance(TimeDelta::seconds(29));
        cache.resolve("tok").expect("valid");
        assert_eq!(*verifier.calls.lock().expect("lock"), 1);
        clock.advance(TimeDelta::seconds(2));
        cache.resolve("tok").expect("valid");
        assert_eq!(*verifier.calls.lock().expect("lock"), 2);
    }

    #[test]
    fn test_ttl_capped_by_verified_expiry() {
        let (clock, verifier, cache) = setup(Some(TimeDelta::seconds(5)));
        cache.resolve("tok").expect("valid");
        clock.advance(TimeDelta::seconds(6));
        assert_eq!(cache.resolve("tok"), Err(AuthError::Expired));
        assert_eq!(*verifier.calls.lock().expect("lock"), 2);
    }

    #[test]
    fn test_unknown_and_missing_tokens() {
        let (_clock, _verifier, cache) = setup(None);
        assert_eq!(cache.resolve("nope"), Err(AuthError::InvalidToken));
        assert_eq!(cache.resolve(""), Err(AuthError::MissingToken));
    }
}
