//! Configuration file support for the bridge daemon.
//!
//! The daemon loads a small TOML file; every field has a default so an
//! empty file (or none at all) yields a working localhost setup. Search
//! order: explicit path argument, `SLUICE_BRIDGE_CONFIG` env var, then
//! `./ring_bridge.toml`, then `/etc/sluice/ring_bridge.toml`.

use crate::error::{SluiceError, SluiceResult};
use crate::net::DEFAULT_BRIDGE_PORT;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Env var naming the config file.
pub const CONFIG_ENV: &str = "SLUICE_BRIDGE_CONFIG";

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_BRIDGE_PORT
}

fn default_max_connections() -> usize {
    crate::net::server::DEFAULT_MAX_CONNECTIONS
}

/// Bridge daemon settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// TCP port of the bridge service.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Cap on concurrent bridge sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Override of the ring directory; unset means the platform default.
    /// Must match the producing processes on this host.
    #[serde(default)]
    pub ring_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            max_connections: default_max_connections(),
            ring_dir: None,
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML string.
    pub fn from_toml(text: &str) -> SluiceResult<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit file.
    pub fn load(path: &Path) -> SluiceResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SluiceError::config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Resolve the config from the standard search order. A missing file is
    /// not an error — defaults apply — but an unreadable or invalid one is.
    pub fn discover(explicit: Option<&Path>) -> SluiceResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(from_env) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&from_env));
        }
        for candidate in ["./ring_bridge.toml", "/etc/sluice/ring_bridge.toml"] {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load(path);
            }
        }
        Ok(Self::default())
    }

    fn validate(&self) -> SluiceResult<()> {
        if self.max_connections == 0 {
            return Err(SluiceError::config("max_connections must be at least 1"));
        }
        if self.listen_addr.is_empty() {
            return Err(SluiceError::config("listen_addr must not be empty"));
        }
        Ok(())
    }

    /// `listen_addr:port` for the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.port)
    }

    /// Apply the ring-dir override for this process, if configured.
    pub fn apply_ring_dir(&self) {
        if let Some(dir) = &self.ring_dir {
            std::env::set_var(crate::memory::RING_DIR_ENV, dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = BridgeConfig::from_toml("").unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0");
        assert_eq!(cfg.port, DEFAULT_BRIDGE_PORT);
        assert_eq!(cfg.max_connections, 64);
        assert!(cfg.ring_dir.is_none());
    }

    #[test]
    fn fields_parse_and_validate() {
        let cfg = BridgeConfig::from_toml(
            r#"
            listen_addr = "127.0.0.1"
            port = 4100
            max_connections = 8
            ring_dir = "/tmp/rings"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:4100");
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.ring_dir.as_deref(), Some(Path::new("/tmp/rings")));
    }

    #[test]
    fn zero_connections_rejected() {
        assert!(matches!(
            BridgeConfig::from_toml("max_connections = 0"),
            Err(SluiceError::Config(_))
        ));
    }

    #[test]
    fn unknown_port_type_rejected() {
        assert!(matches!(
            BridgeConfig::from_toml("port = \"high\""),
            Err(SluiceError::Config(_))
        ));
    }
}
