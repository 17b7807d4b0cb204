//! Chat client configuration.

use std::time::Duration;

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000/api/agent";
pub const FALLBACK_INSTANCE_ENDPOINT: &str = "https://deltaloyalty-demo.my.salesforce.com";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base of the relay's agent routes, without trailing slash.
    pub relay_url: String,
    /// Sent with every request; the relay's default applies when unset.
    pub assistant_id: Option<String>,
    /// Endpoint placed in the session payload's `instanceConfig`.
    pub instance_endpoint: String,
    /// Longest silence tolerated while reading a reply. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_owned(),
            assistant_id: None,
            instance_endpoint: FALLBACK_INSTANCE_ENDPOINT.to_owned(),
            idle_timeout: idle_timeout(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Config pointing at `relay_url` with every other field defaulted.
    #[must_use]
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self { relay_url: relay_url.into().trim_end_matches('/').to_owned(), ..Self::default() }
    }

    /// Read `CHAT_RELAY_URL`, `CHAT_ASSISTANT_ID`, `CHAT_INSTANCE_ENDPOINT`
    /// and `CHAT_IDLE_TIMEOUT_SECS` (`0` disables the idle timeout).
    ///
    /// # Errors
    ///
    /// Returns [`crate::ClientError::Config`] when the idle timeout is not a
    /// whole number of seconds.
    pub fn from_env() -> Result<Self, crate::ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] over an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, crate::ClientError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let idle_secs = match get("CHAT_IDLE_TIMEOUT_SECS") {
            None => DEFAULT_IDLE_TIMEOUT_SECS,
            Some(raw) => raw
                .parse()
                .map_err(|_| crate::ClientError::Config(format!("CHAT_IDLE_TIMEOUT_SECS: {raw:?}")))?,
        };

        let mut config = Self::new(get("CHAT_RELAY_URL").unwrap_or_else(|| DEFAULT_RELAY_URL.to_owned()));
        config.assistant_id = get("CHAT_ASSISTANT_ID");
        if let Some(endpoint) = get("CHAT_INSTANCE_ENDPOINT") {
            config.instance_endpoint = endpoint;
        }
        config.idle_timeout = idle_timeout(idle_secs);
        Ok(config)
    }
}

/// Seconds to an optional timeout; zero means none.
#[must_use]
pub fn idle_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
