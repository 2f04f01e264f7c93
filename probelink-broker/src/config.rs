use anyhow::{Context, Result};
use probelink_protocol::DEFAULT_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Broker-wide settings every session shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// The one account this broker accepts.
    pub user: String,
    pub password: String,

    /// Highest heartbeat interval offered to clients, in seconds. 0 disables heartbeats.
    pub heartbeat_secs: u16,

    /// Frames larger than this close the connection.
    pub max_frame_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            user: "guest".to_string(),
            password: "guest".to_string(),
            heartbeat_secs: 60,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl BrokerConfig {
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => Self::read_from_file(p),
            None => Ok(Self::default()),
        }
    }

    fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {:?}", path.as_ref()))?;
        let cfg: BrokerConfig = toml::from_str(&raw).with_context(|| "parsing broker config TOML")?;
        Ok(cfg)
    }

    /// Both sides must want heartbeats; the smaller interval wins.
    pub fn negotiate_heartbeat(&self, requested: u16) -> u16 {
        if requested == 0 || self.heartbeat_secs == 0 {
            0
        } else {
            requested.min(self.heartbeat_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "password = \"secret\"\nheartbeat_secs = 10").unwrap();

        let cfg = BrokerConfig::load_or_default(Some(file.path())).unwrap();
        assert_eq!(cfg.user, "guest");
        assert_eq!(cfg.password, "secret");
        assert_eq!(cfg.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(cfg.negotiate_heartbeat(60), 10);
        assert_eq!(cfg.negotiate_heartbeat(0), 0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BrokerConfig::load_or_default(Some(dir.path().join("absent.toml"))).is_err());
    }
}
