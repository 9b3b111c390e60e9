//! Proxy configuration.
//!
//! Layered: built-in defaults, then an optional JSON config file, then
//! `SLIPSTREAM_*` environment variables. CLI flags override on top of the
//! loaded value in `main`.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Runtime configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Data directory holding `accounts.json`.
    pub data_dir: PathBuf,
    /// Model retried once when all accounts are exhausted for the
    /// requested one.
    pub fallback_model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3180,
            data_dir: default_data_dir(),
            fallback_model: None,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then config file, then environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Json::file(path));
        }
        figment.merge(Env::prefixed("SLIPSTREAM_")).extract()
    }

    /// Path of the accounts file under the data directory.
    #[must_use]
    pub fn accounts_path(&self) -> PathBuf {
        slipstream_auth::storage::accounts_file_path(&self.data_dir)
    }
}

/// `~/.slipstream`, falling back to the working directory.
fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".slipstream")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 3180);
        assert!(cfg.fallback_model.is_none());
        assert!(cfg.data_dir.ends_with(".slipstream"));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9999, "fallback_model": "gemini-2.5-flash"}"#)
            .unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.fallback_model.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let cfg = Config::load(Some(Path::new("/nonexistent/config.json"))).unwrap();
        assert_eq!(cfg.port, 3180);
    }

    #[test]
    fn accounts_path_under_data_dir() {
        let cfg = Config {
            data_dir: PathBuf::from("/tmp/slip-test"),
            ..Config::default()
        };
        assert_eq!(cfg.accounts_path(), PathBuf::from("/tmp/slip-test/accounts.json"));
    }
}
