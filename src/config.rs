//! Helper configuration loading from environment variables.
//!
//! All configuration values are loaded from `NETMON_HELPER_*` environment
//! variables with safe defaults. Invalid values fall back to defaults without
//! crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `NETMON_HELPER_ENDPOINT` | platform | Pipe name or socket path |
//! | `NETMON_HELPER_SECRET` | (none) | Hex launch secret shared with the UI |
//! | `NETMON_HELPER_IDENTITY` | netmon-ui | Identity claimed by the client |
//! | `NETMON_HELPER_MAX_MESSAGE_SIZE` | 1048576 | Max frame incl. prefix (bytes, floor 4096) |
//! | `NETMON_HELPER_MAX_SESSIONS` | 10 | Max concurrent sessions |
//! | `NETMON_HELPER_MAX_SESSION_DURATION` | 28800 | Absolute session lifetime (secs) |
//! | `NETMON_HELPER_SESSION_IDLE_TIMEOUT` | 60 | Idle window (secs) |
//! | `NETMON_HELPER_SWEEP_INTERVAL` | 5 | Session sweep period (secs) |
//! | `NETMON_HELPER_MAX_REQUESTS_PER_SEC` | 100 | Per-session request rate |
//! | `NETMON_HELPER_TIMESTAMP_FRESHNESS` | 30 | Auth timestamp window (secs) |
//! | `NETMON_HELPER_MAX_AUTH_ATTEMPTS_PER_SEC` | 5 | Per-identity attempt rate |
//! | `NETMON_HELPER_MAX_AUTH_FAILURES` | 5 | Failures before lockout |
//! | `NETMON_HELPER_AUTH_LOCKOUT` | 60 | Lockout cooldown (secs) |
//! | `NETMON_HELPER_REQUEST_TIMEOUT` | 10 | Executor timeout (secs) |
//! | `NETMON_HELPER_SHUTDOWN_TIMEOUT` | 5 | Graceful shutdown timeout (secs) |
//! | `NETMON_HELPER_LOG` | info | Log filter |
//! | `NETMON_HELPER_LOG_FORMAT` | json | `json` or `pretty` |
//!
//! Durations are whole seconds, clamped to `1..=MAX_DURATION_SECS`.

use std::time::Duration;

use serde::Serialize;

use crate::ipc::{
    AuthConfig, IpcHandlerConfig, IpcServerConfig, SessionConfig, SharedSecret,
    DEFAULT_ENDPOINT, DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::telemetry::{LogConfig, LogFormat};

pub const ENV_ENDPOINT: &str = "NETMON_HELPER_ENDPOINT";
pub const ENV_SECRET: &str = "NETMON_HELPER_SECRET";
pub const ENV_IDENTITY: &str = "NETMON_HELPER_IDENTITY";

/// Client identity used when none is configured.
pub const DEFAULT_IDENTITY: &str = "netmon-ui";

const MIN_MESSAGE_SIZE: usize = 4096;

/// Ceiling for every duration setting (365 days).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

const DURATION_KEYS: &[&str] = &[
    "NETMON_HELPER_MAX_SESSION_DURATION",
    "NETMON_HELPER_SESSION_IDLE_TIMEOUT",
    "NETMON_HELPER_SWEEP_INTERVAL",
    "NETMON_HELPER_TIMESTAMP_FRESHNESS",
    "NETMON_HELPER_AUTH_LOCKOUT",
    "NETMON_HELPER_REQUEST_TIMEOUT",
    "NETMON_HELPER_SHUTDOWN_TIMEOUT",
];

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub endpoint: String,
    pub secret_configured: bool,
    pub identity: String,
    pub max_message_size: usize,
    pub max_sessions: usize,
    pub max_session_duration_secs: u64,
    pub session_idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_requests_per_sec: u32,
    pub timestamp_freshness_secs: u64,
    pub max_auth_attempts_per_sec: u32,
    pub max_auth_failures: u32,
    pub auth_lockout_secs: u64,
    pub request_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub log_format: String,
}

impl EffectiveConfig {
    /// `KEY=value` lines in environment-variable form.
    pub fn to_env_lines(&self) -> Vec<String> {
        vec![
            format!("NETMON_HELPER_ENDPOINT={}", self.endpoint),
            format!(
                "NETMON_HELPER_SECRET={}",
                if self.secret_configured { "<set>" } else { "<unset>" }
            ),
            format!("NETMON_HELPER_IDENTITY={}", self.identity),
            format!("NETMON_HELPER_MAX_MESSAGE_SIZE={}", self.max_message_size),
            format!("NETMON_HELPER_MAX_SESSIONS={}", self.max_sessions),
            format!("NETMON_HELPER_MAX_SESSION_DURATION={}", self.max_session_duration_secs),
            format!("NETMON_HELPER_SESSION_IDLE_TIMEOUT={}", self.session_idle_timeout_secs),
            format!("NETMON_HELPER_SWEEP_INTERVAL={}", self.sweep_interval_secs),
            format!("NETMON_HELPER_MAX_REQUESTS_PER_SEC={}", self.max_requests_per_sec),
            format!("NETMON_HELPER_TIMESTAMP_FRESHNESS={}", self.timestamp_freshness_secs),
            format!("NETMON_HELPER_MAX_AUTH_ATTEMPTS_PER_SEC={}", self.max_auth_attempts_per_sec),
            format!("NETMON_HELPER_MAX_AUTH_FAILURES={}", self.max_auth_failures),
            format!("NETMON_HELPER_AUTH_LOCKOUT={}", self.auth_lockout_secs),
            format!("NETMON_HELPER_REQUEST_TIMEOUT={}", self.request_timeout_secs),
            format!("NETMON_HELPER_SHUTDOWN_TIMEOUT={}", self.shutdown_timeout_secs),
            format!("NETMON_HELPER_LOG={}", self.log_level),
            format!("NETMON_HELPER_LOG_FORMAT={}", self.log_format),
        ]
    }
}

/// All helper configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub endpoint: String,
    /// Raw hex secret; parsed by [`EnvConfig::shared_secret`].
    pub secret: Option<String>,
    pub identity: String,
    pub ipc_server: IpcServerConfig,
    pub auth: AuthConfig,
    pub sessions: SessionConfig,
    pub handler: IpcHandlerConfig,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        let auth = AuthConfig::default();
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            secret: None,
            identity: DEFAULT_IDENTITY.to_string(),
            ipc_server: IpcServerConfig::default(),
            auth,
            sessions: SessionConfig::default(),
            handler: IpcHandlerConfig {
                max_auth_failures_per_connection: auth.max_consecutive_failures,
                ..IpcHandlerConfig::default()
            },
            shutdown_timeout: Duration::from_secs(5),
            log: LogConfig::default(),
        }
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a seconds env var, clamped to `1..=MAX_DURATION_SECS`.
fn parse_secs(key: &str, default: u64) -> Duration {
    let secs = match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    };
    Duration::from_secs(secs.clamp(1, MAX_DURATION_SECS))
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn load_ipc_server_config() -> IpcServerConfig {
    let max_message_size = parse_usize("NETMON_HELPER_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE);
    IpcServerConfig {
        max_message_size: max_message_size.max(MIN_MESSAGE_SIZE),
    }
}

fn load_auth_config() -> AuthConfig {
    AuthConfig {
        timestamp_freshness: parse_secs("NETMON_HELPER_TIMESTAMP_FRESHNESS", 30),
        max_attempts_per_second: parse_u32("NETMON_HELPER_MAX_AUTH_ATTEMPTS_PER_SEC", 5).max(1),
        max_consecutive_failures: parse_u32("NETMON_HELPER_MAX_AUTH_FAILURES", 5).max(1),
        lockout_cooldown: parse_secs("NETMON_HELPER_AUTH_LOCKOUT", 60),
    }
}

fn load_session_config() -> SessionConfig {
    SessionConfig {
        max_sessions: parse_usize("NETMON_HELPER_MAX_SESSIONS", 10).max(1),
        max_duration: parse_secs("NETMON_HELPER_MAX_SESSION_DURATION", 8 * 60 * 60),
        idle_timeout: parse_secs("NETMON_HELPER_SESSION_IDLE_TIMEOUT", 60),
        sweep_interval: parse_secs("NETMON_HELPER_SWEEP_INTERVAL", 5),
    }
}

fn load_log_config() -> LogConfig {
    let level = non_empty_var("NETMON_HELPER_LOG").unwrap_or_else(|| "info".to_string());
    let format = std::env::var("NETMON_HELPER_LOG_FORMAT")
        .ok()
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or_default();
    LogConfig {
        format,
        level,
        output_path: None,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let auth = load_auth_config();
    EnvConfig {
        endpoint: get_endpoint(),
        secret: non_empty_var(ENV_SECRET),
        identity: non_empty_var(ENV_IDENTITY).unwrap_or_else(|| DEFAULT_IDENTITY.to_string()),
        ipc_server: load_ipc_server_config(),
        auth,
        sessions: load_session_config(),
        handler: IpcHandlerConfig {
            max_requests_per_second: parse_u32("NETMON_HELPER_MAX_REQUESTS_PER_SEC", 100).max(1),
            request_timeout: parse_secs("NETMON_HELPER_REQUEST_TIMEOUT", 10),
            max_auth_failures_per_connection: auth.max_consecutive_failures,
        },
        shutdown_timeout: parse_secs("NETMON_HELPER_SHUTDOWN_TIMEOUT", 5),
        log: load_log_config(),
    }
}

/// Endpoint from `NETMON_HELPER_ENDPOINT` or the platform default.
pub fn get_endpoint() -> String {
    non_empty_var(ENV_ENDPOINT).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}

impl EnvConfig {
    /// Parse the configured launch secret. `None` when unset.
    pub fn shared_secret(&self) -> Option<Result<SharedSecret, crate::ipc::AuthError>> {
        self.secret.as_deref().map(SharedSecret::from_hex)
    }

    /// Problems that make the configuration unusable or surprising.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        match self.shared_secret() {
            None => problems.push(format!("{} is not set", ENV_SECRET)),
            Some(Err(e)) => problems.push(format!("{}: {}", ENV_SECRET, e)),
            Some(Ok(_)) => {}
        }
        if self.sessions.idle_timeout >= self.sessions.max_duration {
            problems.push(
                "NETMON_HELPER_SESSION_IDLE_TIMEOUT >= NETMON_HELPER_MAX_SESSION_DURATION; \
                 sessions never idle out"
                    .to_string(),
            );
        }
        if self.sessions.sweep_interval > self.sessions.idle_timeout {
            problems.push(
                "NETMON_HELPER_SWEEP_INTERVAL > NETMON_HELPER_SESSION_IDLE_TIMEOUT; \
                 idle sessions outlive their window"
                    .to_string(),
            );
        }
        for key in DURATION_KEYS {
            let Ok(raw) = std::env::var(key) else {
                continue;
            };
            if raw.trim().parse::<u64>().is_ok_and(|secs| secs > MAX_DURATION_SECS) {
                problems.push(format!(
                    "{}={} exceeds {} seconds; clamped",
                    key,
                    raw.trim(),
                    MAX_DURATION_SECS
                ));
            }
        }
        if let Ok(raw) = std::env::var("NETMON_HELPER_LOG_FORMAT") {
            if raw.parse::<LogFormat>().is_err() {
                problems.push(format!("NETMON_HELPER_LOG_FORMAT={} is not json or pretty", raw));
            }
        }
        problems
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            endpoint: self.endpoint.clone(),
            secret_configured: self.secret.is_some(),
            identity: self.identity.clone(),
            max_message_size: self.ipc_server.max_message_size,
            max_sessions: self.sessions.max_sessions,
            max_session_duration_secs: self.sessions.max_duration.as_secs(),
            session_idle_timeout_secs: self.sessions.idle_timeout.as_secs(),
            sweep_interval_secs: self.sessions.sweep_interval.as_secs(),
            max_requests_per_sec: self.handler.max_requests_per_second,
            timestamp_freshness_secs: self.auth.timestamp_freshness.as_secs(),
            max_auth_attempts_per_sec: self.auth.max_attempts_per_second,
            max_auth_failures: self.auth.max_consecutive_failures,
            auth_lockout_secs: self.auth.lockout_cooldown.as_secs(),
            request_timeout_secs: self.handler.request_timeout.as_secs(),
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_level: self.log.level.clone(),
            log_format: self.log.format.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "NETMON_HELPER_ENDPOINT",
        "NETMON_HELPER_SECRET",
        "NETMON_HELPER_IDENTITY",
        "NETMON_HELPER_MAX_MESSAGE_SIZE",
        "NETMON_HELPER_MAX_SESSIONS",
        "NETMON_HELPER_MAX_SESSION_DURATION",
        "NETMON_HELPER_SESSION_IDLE_TIMEOUT",
        "NETMON_HELPER_SWEEP_INTERVAL",
        "NETMON_HELPER_MAX_REQUESTS_PER_SEC",
        "NETMON_HELPER_TIMESTAMP_FRESHNESS",
        "NETMON_HELPER_MAX_AUTH_ATTEMPTS_PER_SEC",
        "NETMON_HELPER_MAX_AUTH_FAILURES",
        "NETMON_HELPER_AUTH_LOCKOUT",
        "NETMON_HELPER_REQUEST_TIMEOUT",
        "NETMON_HELPER_SHUTDOWN_TIMEOUT",
        "NETMON_HELPER_LOG",
        "NETMON_HELPER_LOG_FORMAT",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(cfg.secret, None);
        assert_eq!(cfg.identity, "netmon-ui");
        assert_eq!(cfg.ipc_server.max_message_size, 1024 * 1024);
        assert_eq!(cfg.sessions.max_sessions, 10);
        assert_eq!(cfg.sessions.max_duration, Duration::from_secs(28_800));
        assert_eq!(cfg.handler.max_requests_per_second, 100);
        assert_eq!(cfg.auth.max_attempts_per_second, 5);
        assert_eq!(cfg.auth.timestamp_freshness, Duration::from_secs(30));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("NETMON_HELPER_ENDPOINT", "/tmp/helper.sock");
        std::env::set_var("NETMON_HELPER_MAX_SESSIONS", "3");
        std::env::set_var("NETMON_HELPER_MAX_AUTH_FAILURES", "7");
        std::env::set_var("NETMON_HELPER_LOG_FORMAT", "pretty");
        let cfg = load();
        assert_eq!(cfg.endpoint, "/tmp/helper.sock");
        assert_eq!(cfg.sessions.max_sessions, 3);
        assert_eq!(cfg.auth.max_consecutive_failures, 7);
        assert_eq!(cfg.handler.max_auth_failures_per_connection, 7);
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("NETMON_HELPER_MAX_SESSIONS", "lots");
        std::env::set_var("NETMON_HELPER_REQUEST_TIMEOUT", "-1");
        std::env::set_var("NETMON_HELPER_LOG_FORMAT", "xml");
        let cfg = load();
        assert_eq!(cfg.sessions.max_sessions, 10);
        assert_eq!(cfg.handler.request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert!(cfg.validate().iter().any(|p| p.contains("LOG_FORMAT")));
        clear_env_vars();
    }

    #[test]
    fn test_floors_applied() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("NETMON_HELPER_MAX_MESSAGE_SIZE", "16");
        std::env::set_var("NETMON_HELPER_MAX_SESSIONS", "0");
        std::env::set_var("NETMON_HELPER_SWEEP_INTERVAL", "0");
        let cfg = load();
        assert_eq!(cfg.ipc_server.max_message_size, 4096);
        assert_eq!(cfg.sessions.max_sessions, 1);
        assert_eq!(cfg.sessions.sweep_interval, Duration::from_secs(1));
        clear_env_vars();
    }

    #[test]
    fn test_huge_durations_clamped() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let huge = u64::MAX.to_string();
        std::env::set_var("NETMON_HELPER_MAX_SESSION_DURATION", &huge);
        std::env::set_var("NETMON_HELPER_AUTH_LOCKOUT", &huge);
        std::env::set_var("NETMON_HELPER_SHUTDOWN_TIMEOUT", &huge);
        let cfg = load();
        let ceiling = Duration::from_secs(MAX_DURATION_SECS);
        assert_eq!(cfg.sessions.max_duration, ceiling);
        assert_eq!(cfg.auth.lockout_cooldown, ceiling);
        assert_eq!(cfg.shutdown_timeout, ceiling);

        let problems = cfg.validate();
        assert!(problems
            .iter()
            .any(|p| p.contains("NETMON_HELPER_AUTH_LOCKOUT") && p.contains("clamped")));
        assert!(problems.iter().any(|p| p.contains("NETMON_HELPER_MAX_SESSION_DURATION")));
        clear_env_vars();
    }

    #[test]
    fn test_validate_secret() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert!(cfg.validate().iter().any(|p| p.contains("not set")));

        std::env::set_var("NETMON_HELPER_SECRET", "abcd");
        assert!(!load().validate().is_empty());

        std::env::set_var("NETMON_HELPER_SECRET", "00112233445566778899aabbccddeeff");
        let cfg = load();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        assert!(matches!(cfg.shared_secret(), Some(Ok(_))));
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_hides_secret() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("NETMON_HELPER_SECRET", "00112233445566778899aabbccddeeff");
        let eff = load().effective_config();
        assert!(eff.secret_configured);
        let lines = eff.to_env_lines().join("\n");
        assert!(lines.contains("NETMON_HELPER_SECRET=<set>"));
        assert!(!lines.contains("00112233"));
        let json = serde_json::to_string(&eff).unwrap();
        assert!(!json.contains("00112233"));
        clear_env_vars();
    }
}
