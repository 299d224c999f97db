// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory for the flat-file store
    pub data_dir: PathBuf,
    /// Log level filter (tracing env-filter syntax)
    pub log_level: String,
    /// HS256 secret used to verify bearer tokens
    pub jwt_secret: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            jwt_secret: "change-me".to_string(),
        }
    }
}

impl Settings {
    /// Load settings: defaults, overridden by `config.toml`, overridden
    /// by `TYPERACE_`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load settings with an explicit config file path
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TYPERACE_"))
            .extract()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.bind_addr.port(), 8080);
        assert_eq!(settings.data_dir, PathBuf::from("data"));
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_load_without_config_file_falls_back_to_defaults() {
        // No config.toml in the test cwd for this path
        let settings = Settings::load_from("does-not-exist.toml").unwrap();
        assert_eq!(settings.bind_addr, Settings::default().bind_addr);
    }
}
