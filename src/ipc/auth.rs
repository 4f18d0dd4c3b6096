//! Authenticate-handshake verification.
//!
//! SECURITY: This module enforces that only callers holding the launch
//! secret can open a session with the elevated helper. Verification order:
//!
//! 1. timestamp freshness (bounds the replay window)
//! 2. per-identity lockout after repeated failures
//! 3. per-identity attempt rate
//! 4. proof check through the [`CredentialVerifier`]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use tokio::time::Instant;

use super::rate_limit::{RateLimitConfig, RateLimiter};
use crate::telemetry::{self, SecurityEvent};

type HmacSha256 = Hmac<Sha256>;

/// Longest identity claim accepted, in bytes.
pub const MAX_IDENTITY_LEN: usize = 128;

/// Minimum launch secret length, in bytes.
pub const MIN_SECRET_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication timestamp outside freshness window ({skew_secs}s skew)")]
    StaleTimestamp { skew_secs: i64 },

    #[error("Identity locked out, retry after {retry_after:?}")]
    LockedOut { retry_after: Duration },

    #[error("Too many authentication attempts")]
    RateLimited,

    #[error("Invalid proof")]
    InvalidProof,

    #[error("Malformed identity claim")]
    MalformedClaim,

    #[error("Invalid shared secret: {0}")]
    InvalidSecret(String),
}

impl AuthError {
    fn as_str(&self) -> &'static str {
        match self {
            Self::StaleTimestamp { .. } => "stale_timestamp",
            Self::LockedOut { .. } => "locked_out",
            Self::RateLimited => "rate_limited",
            Self::InvalidProof => "invalid_proof",
            Self::MalformedClaim => "malformed_claim",
            Self::InvalidSecret(_) => "invalid_secret",
        }
    }
}

/// Authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    /// Wrap an already-verified identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host-supplied proof check. Implementations must be constant-time with
/// respect to the proof bytes.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, identity: &str, timestamp: i64, proof: &[u8]) -> bool;
}

/// HMAC-SHA256 launch secret shared by the UI process and the helper.
///
/// The proof is `HMAC(secret, "<identity>\n<timestamp>")`.
#[derive(Clone)]
pub struct SharedSecret {
    key: Vec<u8>,
    mac: HmacSha256,
}

impl SharedSecret {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, AuthError> {
        let key = key.into();
        if key.len() < MIN_SECRET_LEN {
            return Err(AuthError::InvalidSecret(format!(
                "secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        let mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
        Ok(Self { key, mac })
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, AuthError> {
        let key = hex::decode(hex_key.trim()).map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
        Self::new(key)
    }

    /// Fresh 32-byte secret for a helper launch.
    pub fn generate() -> Result<Self, AuthError> {
        let mut key = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.key)
    }

    /// Compute the proof for `identity` at `timestamp`.
    pub fn sign(&self, identity: &str, timestamp: i64) -> Vec<u8> {
        self.keyed(identity, timestamp).finalize().into_bytes().to_vec()
    }

    fn keyed(&self, identity: &str, timestamp: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(identity.as_bytes());
        mac.update(b"\n");
        mac.update(timestamp.to_string().as_bytes());
        mac
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret").field("key", &"[REDACTED]").finish()
    }
}

impl CredentialVerifier for SharedSecret {
    fn verify(&self, identity: &str, timestamp: i64, proof: &[u8]) -> bool {
        // verify_slice compares in constant time
        self.keyed(identity, timestamp).verify_slice(proof).is_ok()
    }
}

/// Authenticator limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthConfig {
    pub timestamp_freshness: Duration,
    pub max_attempts_per_second: u32,
    pub max_consecutive_failures: u32,
    pub lockout_cooldown: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            timestamp_freshness: Duration::from_secs(30),
            max_attempts_per_second: 5,
            max_consecutive_failures: 5,
            lockout_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct AttemptRecord {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    locked_until: Option<Instant>,
}

impl AttemptRecord {
    /// Forget failures that stayed quiet for `window` without locking.
    fn decay(&mut self, now: Instant, window: Duration) {
        if self.locked_until.is_some() {
            return;
        }
        if let Some(last) = self.last_failure {
            if super::deadline_after(last, window) <= now {
                self.consecutive_failures = 0;
                self.last_failure = None;
            }
        }
    }

    fn is_pristine(&self, now: Instant) -> bool {
        self.consecutive_failures == 0 && self.locked_until.map_or(true, |until| until <= now)
    }
}

/// Verifies authenticate messages and tracks per-identity failures.
pub struct Authenticator {
    verifier: Arc<dyn CredentialVerifier>,
    records: DashMap<String, Arc<Mutex<AttemptRecord>>>,
    attempts: RateLimiter<String>,
    config: AuthConfig,
}

impl Authenticator {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, config: AuthConfig) -> Self {
        Self {
            verifier,
            records: DashMap::new(),
            attempts: RateLimiter::new(RateLimitConfig::per_second(config.max_attempts_per_second)),
            config,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verify a claim against the current wall clock.
    pub fn verify(
        &self,
        identity: &str,
        timestamp: i64,
        proof: &[u8],
    ) -> Result<Principal, AuthError> {
        self.verify_at(identity, timestamp, proof, chrono::Utc::now().timestamp())
    }

    /// Verify a claim as if the wall clock read `now_unix`.
    pub fn verify_at(
        &self,
        identity: &str,
        timestamp: i64,
        proof: &[u8],
        now_unix: i64,
    ) -> Result<Principal, AuthError> {
        let result = self.evaluate(identity, timestamp, proof, now_unix);
        match &result {
            Ok(principal) => {
                telemetry::log_security_event(
                    SecurityEvent::AuthSuccess,
                    "Helper client authenticated",
                    &[("identity", principal.as_str())],
                );
            }
            Err(e) => {
                telemetry::record_auth_failure(e.as_str());
                let event = match e {
                    AuthError::RateLimited => SecurityEvent::RateLimited,
                    AuthError::LockedOut { .. } => SecurityEvent::AuthLockout,
                    _ => SecurityEvent::AuthFailure,
                };
                // Malformed claims are not echoed into the log
                let shown = if matches!(e, AuthError::MalformedClaim) {
                    "<malformed>"
                } else {
                    identity
                };
                telemetry::log_security_event(
                    event,
                    "Authentication rejected",
                    &[("identity", shown), ("reason", e.as_str())],
                );
            }
        }
        result
    }

    fn evaluate(
        &self,
        identity: &str,
        timestamp: i64,
        proof: &[u8],
        now_unix: i64,
    ) -> Result<Principal, AuthError> {
        validate_claim(identity)?;

        let skew_secs = now_unix.saturating_sub(timestamp);
        if skew_secs.unsigned_abs() > self.config.timestamp_freshness.as_secs() {
            return Err(AuthError::StaleTimestamp { skew_secs });
        }

        // Clone the Arc so the shard lock is released before the record lock
        // is taken. The extra reference keeps `prune` off this record.
        let record = self.records.entry(identity.to_owned()).or_default().clone();
        let mut record = record.lock();
        let now = Instant::now();

        if let Some(until) = record.locked_until {
            if now < until {
                return Err(AuthError::LockedOut { retry_after: until - now });
            }
            record.locked_until = None;
            record.consecutive_failures = 0;
            record.last_failure = None;
        }
        record.decay(now, self.config.lockout_cooldown);

        if self.attempts.check(identity.to_owned()).is_err() {
            return Err(AuthError::RateLimited);
        }

        if self.verifier.verify(identity, timestamp, proof) {
            record.consecutive_failures = 0;
            record.last_failure = None;
            return Ok(Principal(identity.to_owned()));
        }

        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_failure = Some(now);
        if record.consecutive_failures >= self.config.max_consecutive_failures {
            record.locked_until = Some(super::deadline_after(now, self.config.lockout_cooldown));
        }
        Err(AuthError::InvalidProof)
    }

    /// Consecutive failures currently recorded for `identity`.
    pub fn consecutive_failures(&self, identity: &str) -> u32 {
        self.records
            .get(identity)
            .map(|r| r.lock().consecutive_failures)
            .unwrap_or(0)
    }

    /// Drop attempt records that carry no failures or active lockout, and
    /// attempt windows that have gone quiet. Failures older than the lockout
    /// cooldown decay first. Records held by an in-progress verification
    /// are kept.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.config.lockout_cooldown;
        self.records.retain(|_, record| {
            if Arc::strong_count(record) > 1 {
                return true;
            }
            let mut record = record.lock();
            record.decay(now, window);
            !record.is_pristine(now)
        });
        self.attempts.prune();
    }

    pub fn tracked_identities(&self) -> usize {
        self.records.len()
    }
}

fn validate_claim(identity: &str) -> Result<(), AuthError> {
    if identity.is_empty()
        || identity.len() > MAX_IDENTITY_LEN
        || !identity.bytes().all(|b| b.is_ascii_graphic())
    {
        return Err(AuthError::MalformedClaim);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SharedSecret {
        SharedSecret::new(b"0123456789abcdef0123456789abcdef".to_vec()).unwrap()
    }

    #[test]
    fn test_sign_verify() {
        let s = secret();
        let proof = s.sign("netmon-ui", 1_700_000_000);
        assert_eq!(proof.len(), 32);
        assert!(s.verify("netmon-ui", 1_700_000_000, &proof));
        assert!(!s.verify("netmon-ui", 1_700_000_001, &proof));
        assert!(!s.verify("other", 1_700_000_000, &proof));
        assert!(!s.verify("netmon-ui", 1_700_000_000, &proof[..31]));
    }

    #[test]
    fn test_secret_too_short() {
        assert!(matches!(SharedSecret::new(b"short".to_vec()), Err(AuthError::InvalidSecret(_))));
    }

    #[test]
    fn test_secret_hex_roundtrip() {
        let s = SharedSecret::generate().unwrap();
        let again = SharedSecret::from_hex(&s.to_hex()).unwrap();
        let proof = s.sign("ui", 5);
        assert!(again.verify("ui", 5, &proof));
        assert!(SharedSecret::from_hex("zz").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", secret());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("0123456789"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_skips_record_in_use() {
        let auth = Authenticator::new(Arc::new(secret()), AuthConfig::default());
        let held = auth.records.entry("netmon-ui".to_owned()).or_default().clone();

        // Pristine but referenced: a concurrent failure must not be orphaned
        auth.prune();
        assert_eq!(auth.tracked_identities(), 1);
        held.lock().consecutive_failures += 1;
        assert_eq!(auth.consecutive_failures("netmon-ui"), 1);

        drop(held);
        auth.records.get("netmon-ui").unwrap().lock().consecutive_failures = 0;
        auth.prune();
        assert_eq!(auth.tracked_identities(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_lockout_saturates() {
        let config = AuthConfig {
            max_consecutive_failures: 1,
            lockout_cooldown: Duration::MAX,
            ..AuthConfig::default()
        };
        let auth = Authenticator::new(Arc::new(secret()), config);
        let now = 1_700_000_000;
        assert_eq!(
            auth.verify_at("netmon-ui", now, &[0u8; 32], now),
            Err(AuthError::InvalidProof)
        );
        let proof = secret().sign("netmon-ui", now);
        assert!(matches!(
            auth.verify_at("netmon-ui", now, &proof, now),
            Err(AuthError::LockedOut { .. })
        ));
    }

    #[test]
    fn test_claim_validation() {
        assert!(validate_claim("netmon-ui").is_ok());
        assert_eq!(validate_claim(""), Err(AuthError::MalformedClaim));
        assert_eq!(validate_claim("has space"), Err(AuthError::MalformedClaim));
        assert_eq!(
            validate_claim(&"x".repeat(MAX_IDENTITY_LEN + 1)),
            Err(AuthError::MalformedClaim)
        );
    }
}
