use crate::core::constants::*;
use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Where the broker lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub user: String,

    /// Base64 of the real password. Decoded only when the broker URL is formatted.
    pub password: String,

    pub server: String,
    pub port: u16,

    /// TCP connect attempts per connection cycle.
    pub connection_attempts: u32,

    /// Requested heartbeat in seconds, 0 disables it.
    pub heartbeat_interval: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            user: "guest".to_string(),
            password: "Z3Vlc3Q=".to_string(), // "guest"
            server: "localhost".to_string(),
            port: DEFAULT_PORT,
            connection_attempts: DEFAULT_CONNECTION_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_SECS,
        }
    }
}

/// Knobs for one publisher or subscriber instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub connection: ConnectionParams,

    /// Fixed wait between a lost connection and the next attempt.
    pub reconnect_delay_ms: u64,

    /// How often the publisher polls its outbound queue.
    pub publish_interval_ms: u64,

    /// Max messages sent per poll.
    pub publish_batch: usize,

    /// Capacity of the outbound queue between producers and the publisher.
    pub queue_capacity: usize,

    /// Upper bound on the graceful close handshake.
    pub close_timeout_ms: u64,

    /// Pause between TCP connect attempts inside one cycle.
    pub attempt_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionParams::default(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            publish_interval_ms: DEFAULT_PUBLISH_INTERVAL.as_millis() as u64,
            publish_batch: DEFAULT_PUBLISH_BATCH,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT.as_millis() as u64,
            attempt_delay_ms: DEFAULT_ATTEMPT_DELAY.as_millis() as u64,
        }
    }
}

impl LinkConfig {
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let cfg = match path {
            Some(p) => Self::read_from_file(p)?,
            None => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.server.is_empty() {
            return Err(ConfigError::Invalid("connection.server must not be empty".into()));
        }
        if self.connection.port == 0 {
            return Err(ConfigError::Invalid("connection.port must not be 0".into()));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect_delay_ms must be positive".into()));
        }
        if self.close_timeout_ms == 0 {
            return Err(ConfigError::Invalid("close_timeout_ms must be positive".into()));
        }
        if self.publish_interval_ms == 0 {
            return Err(ConfigError::Invalid("publish_interval_ms must be positive".into()));
        }
        if self.publish_batch == 0 {
            return Err(ConfigError::Invalid("publish_batch must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn attempt_delay(&self) -> Duration {
        Duration::from_millis(self.attempt_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_path_yields_defaults() {
        let cfg = LinkConfig::load_or_default(None::<&Path>).unwrap();
        assert_eq!(cfg, LinkConfig::default());
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_keeps_defaults_for_the_rest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "reconnect_delay_ms = 250\n\n[connection]\nserver = \"broker.internal\"\nport = 5673"
        )
        .unwrap();

        let cfg = LinkConfig::load_or_default(Some(file.path())).unwrap();
        assert_eq!(cfg.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(cfg.connection.server, "broker.internal");
        assert_eq!(cfg.connection.port, 5673);
        assert_eq!(cfg.connection.user, "guest");
        assert_eq!(cfg.publish_batch, DEFAULT_PUBLISH_BATCH);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "queue_capacity = 0").unwrap();

        let err = LinkConfig::load_or_default(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let zero_backoff = LinkConfig {
            reconnect_delay_ms: 0,
            ..LinkConfig::default()
        };
        assert!(matches!(zero_backoff.validate(), Err(ConfigError::Invalid(m)) if m.contains("reconnect_delay_ms")));

        let zero_close = LinkConfig {
            close_timeout_ms: 0,
            ..LinkConfig::default()
        };
        assert!(matches!(zero_close.validate(), Err(ConfigError::Invalid(m)) if m.contains("close_timeout_ms")));
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = LinkConfig::load_or_default(Some("/definitely/not/here.toml")).unwrap_err();
        match err {
            ConfigError::Read { path, .. } => assert!(path.contains("not/here.toml")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
