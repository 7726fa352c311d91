//! Process-scoped immutable configuration snapshots.
//!
//! Loaded once at startup (from CLI flags, a TOML file, or defaults) and
//! handed to the listener/dispatcher/admission guard as read-only snapshots.
//! No runtime mutation except operator-reloadable knobs, which this server
//! does not yet expose.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rate-limit preset, selectable per command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateClass {
    /// 10 requests per 60s window.
    Low,
    /// 100 requests per 60s window.
    Medium,
    /// 1000 requests per 60s window.
    High,
    /// No rate limiting.
    Unlimited,
    /// An arbitrary `(max_requests, window)` pair, for commands whose rate
    /// doesn't fit one of the fixed presets.
    Custom {
        /// Requests allowed per window.
        max_requests: u32,
        /// Window length, in seconds.
        window_secs: u64,
    },
}

impl RateClass {
    /// `(max_requests, window)` for this preset. `Unlimited` has no
    /// meaningful window; callers must check for it before consulting this.
    #[must_use]
    pub fn window(self) -> Option<(u32, Duration)> {
        match self {
            Self::Low => Some((10, Duration::from_secs(60))),
            Self::Medium => Some((100, Duration::from_secs(60))),
            Self::High => Some((1000, Duration::from_secs(60))),
            Self::Unlimited => None,
            Self::Custom { max_requests, window_secs } => Some((max_requests, Duration::from_secs(window_secs))),
        }
    }
}

/// Socket-level listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address and port to bind, e.g. `"0.0.0.0:7700"`.
    pub bind_address: String,
    /// Socket receive buffer hint (also the per-connection read chunk size).
    pub receive_buffer_size: usize,
    /// Socket send buffer hint.
    pub send_buffer_size: usize,
    /// `TCP_NODELAY`.
    pub no_delay: bool,
    /// `SO_REUSEADDR`.
    pub reuse_address: bool,
    /// Seconds allowed to drain in-flight connections on shutdown before a
    /// force-close.
    pub linger_timeout_secs: u64,
    /// Idle read timeout per connection.
    pub receive_timeout_ms: u64,
    /// Write timeout per connection.
    pub send_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7700".to_string(),
            receive_buffer_size: 64 * 1024,
            send_buffer_size: 64 * 1024,
            no_delay: true,
            reuse_address: false,
            linger_timeout_secs: 5,
            receive_timeout_ms: 300_000,
            send_timeout_ms: 30_000,
        }
    }
}

impl ListenerConfig {
    /// Validate ranges named explicitly by the wire contract.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.receive_buffer_size < 1024 {
            return Err("receive_buffer_size must be >= 1024".to_string());
        }
        if self.send_buffer_size < 1024 {
            return Err("send_buffer_size must be >= 1024".to_string());
        }
        Ok(())
    }

    /// `linger_timeout_secs` as a [`Duration`].
    #[must_use]
    pub fn linger_timeout(&self) -> Duration {
        Duration::from_secs(self.linger_timeout_secs)
    }

    /// `receive_timeout_ms` as a [`Duration`].
    #[must_use]
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// Per-source-IP connection admission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Max concurrent connections from a single source IP.
    pub max_connections_per_ip: u32,
    /// How often, in seconds, the janitor sweeps stale `ConnectionLimitInfo`
    /// entries.
    pub cleanup_interval_secs: u64,
    /// An IP's entry is evicted once idle longer than this, in seconds.
    pub idle_ttl_secs: u64,
    /// Window, in seconds, in which three rate-limit strikes trigger an
    /// abuse disconnect recommendation.
    pub strike_window_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 20,
            cleanup_interval_secs: 300,
            idle_ttl_secs: 3600,
            strike_window_secs: 60,
        }
    }
}

impl AdmissionConfig {
    /// `cleanup_interval_secs` as a [`Duration`].
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// `idle_ttl_secs` as a [`Duration`].
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// `strike_window_secs` as a [`Duration`].
    #[must_use]
    pub fn strike_window(&self) -> Duration {
        Duration::from_secs(self.strike_window_secs)
    }
}

/// Dispatcher-wide defaults; individual handlers may override via their
/// registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Handler timeout, in seconds, before the dispatcher cancels the task
    /// and emits `HandlerTimeout`.
    pub handler_timeout_secs: u64,
    /// Default rate class for commands that don't specify one.
    pub default_rate_class: RateClass,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { handler_timeout_secs: 30, default_rate_class: RateClass::Medium }
    }
}

impl DispatcherConfig {
    /// `handler_timeout_secs` as a [`Duration`].
    #[must_use]
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

/// Full server configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener/socket settings.
    pub listener: ListenerConfig,
    /// Admission guard settings.
    pub admission: AdmissionConfig,
    /// Dispatcher settings.
    pub dispatcher: DispatcherConfig,
}

impl ServerConfig {
    /// Parse a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse as a
    /// valid [`ServerConfig`].
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.listener.validate().is_ok());
        assert_eq!(config.admission.max_connections_per_ip, 20);
    }

    #[test]
    fn rejects_small_buffer_sizes() {
        let mut listener = ListenerConfig::default();
        listener.receive_buffer_size = 10;
        assert!(listener.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.listener.receive_buffer_size, 64 * 1024);
    }

    #[test]
    fn rate_class_windows_match_spec_presets() {
        assert_eq!(RateClass::Low.window(), Some((10, Duration::from_secs(60))));
        assert_eq!(RateClass::High.window(), Some((1000, Duration::from_secs(60))));
        assert_eq!(RateClass::Unlimited.window(), None);
    }
}
