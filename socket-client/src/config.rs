//! Client configuration

use crate::error::SocketError;
use crate::events::QUEUE_STATS_ALIAS;
use std::path::PathBuf;
use std::time::Duration;

/// TLS configuration
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA certificate path
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate path (PEM or P12)
    pub client_cert_path: Option<PathBuf>,
    /// Client private key path (PEM); not needed for P12
    pub client_key_path: Option<PathBuf>,
    /// PKCS#12 password
    pub client_p12_password: Option<String>,
    /// Skip server certificate verification (development only)
    pub danger_accept_invalid_certs: bool,
}

/// What an explicit `disconnect()` does to the tracked project rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomPolicy {
    #[default]
    ClearOnDisconnect,
    Retain,
}

/// Socket client configuration
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Server base URL
    pub url: String,
    /// Socket.IO namespace
    pub namespace: String,
    pub tls: TlsConfig,
    /// End-to-end bound on one `connect()` attempt
    pub connect_timeout: Duration,
    /// Bound on the transport handshake itself
    pub transport_timeout: Duration,
    /// How long a `connect()` for another credential waits on a pending one
    pub wait_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_reconnect_attempts: u32,
    pub room_policy: RoomPolicy,
    /// Inbound names treated as `queue-stats-update`
    pub queue_stats_aliases: Vec<String>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        let url = std::env::var("SPHEROSEG_SOCKET_URL")
            .unwrap_or_else(|_| "http://localhost:3001".to_string());

        Self {
            url,
            namespace: "/".to_string(),
            tls: TlsConfig::default(),
            connect_timeout: Duration::from_secs(15),
            transport_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(25),
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(30000),
            max_reconnect_attempts: 10,
            room_policy: RoomPolicy::default(),
            queue_stats_aliases: vec![QUEUE_STATS_ALIAS.to_string()],
        }
    }
}

impl SocketConfig {
    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SocketError> {
        if self.url.trim().is_empty() {
            return Err(SocketError::Config("url must not be empty".into()));
        }
        let intervals = [
            ("connect_timeout", self.connect_timeout),
            ("transport_timeout", self.transport_timeout),
            ("wait_timeout", self.wait_timeout),
            ("keep_alive_interval", self.keep_alive_interval),
            ("backoff_base", self.backoff_base),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(SocketError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.backoff_base > self.backoff_cap {
            return Err(SocketError::Config(format!(
                "backoff_base {:?} exceeds backoff_cap {:?}",
                self.backoff_base, self.backoff_cap
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(SocketError::Config(
                "max_reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_config_default() {
        let config = SocketConfig::with_url("http://localhost:3001");
        assert_eq!(config.url, "http://localhost:3001");
        assert_eq!(config.namespace, "/");
        assert_eq!(config.keep_alive_interval, Duration::from_secs(25));
        assert_eq!(config.backoff_base, Duration::from_millis(1000));
        assert_eq!(config.backoff_cap, Duration::from_millis(30000));
        assert_eq!(config.room_policy, RoomPolicy::ClearOnDisconnect);
        assert_eq!(config.queue_stats_aliases, vec!["queueStats".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_backoff() {
        let config = SocketConfig {
            backoff_base: Duration::from_secs(60),
            ..SocketConfig::with_url("http://localhost:3001")
        };
        assert!(matches!(config.validate(), Err(SocketError::Config(_))));

        let config = SocketConfig {
            max_reconnect_attempts: 0,
            ..SocketConfig::with_url("http://localhost:3001")
        };
        assert!(config.validate().is_err());

        let config = SocketConfig::with_url("  ");
        assert!(config.validate().is_err());
    }
}
