//! Router configuration.
//!
//! Both configs implement `Default` and `from_env()`. Recognised variables:
//! - `ZKW_SESSION_TIMEOUT_MINS`: host session idle timeout in minutes
//! - `ZKW_LINGER_MS`: time given to queued sends on shutdown
//! - `ZKW_HEARTBEAT_MS`: client heartbeat interval (0 disables)
//! - `ZKW_REPORTED_ADDRESS`: IP the client reports to the host
//!
//! Unparsable values fall back to the defaults.

use std::time::Duration;

use zkw_core::Credentials;

/// Default host session timeout.
pub const DEFAULT_SESSION_TIMEOUT_MINS: u32 = 20;

/// Minimum session timeout in minutes.
pub const MIN_SESSION_TIMEOUT_MINS: u32 = 1;

/// Maximum session timeout in minutes.
pub const MAX_SESSION_TIMEOUT_MINS: u32 = 3600;

/// Host router configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Idle timeout for sessions, in minutes, before clamping.
    pub session_timeout_mins: u32,
    /// Time given to queued sends on shutdown.
    pub linger: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            session_timeout_mins: DEFAULT_SESSION_TIMEOUT_MINS,
            linger: Duration::ZERO,
        }
    }
}

impl HostConfig {
    /// Defaults overridden from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_timeout_mins: env_parse("ZKW_SESSION_TIMEOUT_MINS").unwrap_or(defaults.session_timeout_mins),
            linger: env_parse("ZKW_LINGER_MS").map(Duration::from_millis).unwrap_or(defaults.linger),
        }
    }

    /// Effective idle timeout, clamped to `[1, 3600]` minutes.
    ///
    /// Also the period of the cleanup timer.
    pub fn session_timeout(&self) -> Duration {
        let mins = self
            .session_timeout_mins
            .clamp(MIN_SESSION_TIMEOUT_MINS, MAX_SESSION_TIMEOUT_MINS);
        Duration::from_secs(u64::from(mins) * 60)
    }
}

/// Client router configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Credentials; `None` runs unauthenticated.
    pub credentials: Option<Credentials>,
    /// Heartbeat interval; `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// Self-reported IP sent during the handshake.
    pub reported_address: Option<String>,
    /// Time given to queued sends on shutdown.
    pub linger: Duration,
}

impl ClientConfig {
    /// Defaults overridden from the environment. Credentials are never read
    /// from the environment.
    pub fn from_env() -> Self {
        Self {
            credentials: None,
            heartbeat_interval: env_parse::<u64>("ZKW_HEARTBEAT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            reported_address: std::env::var("ZKW_REPORTED_ADDRESS").ok().filter(|s| !s.is_empty()),
            linger: env_parse("ZKW_LINGER_MS").map(Duration::from_millis).unwrap_or_default(),
        }
    }

    /// Builder-style credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
