//! Settings parser for `.outpost/config.toml`
//!
//! A missing file yields defaults; a malformed file is a hard
//! configuration error rather than a silent fallback.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use outpost_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";
const OUTPOST_DIR: &str = ".outpost";

/// User-tunable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// REST control-plane base URL.
    pub api_url: String,
    /// Bridge WebSocket URL.
    pub socket_url: String,
    /// Display name used for locally-rendered chat entries.
    pub display_name: String,
    /// Bring up the bridge connection automatically at startup.
    pub auto_connect: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8082".to_string(),
            socket_url: "ws://127.0.0.1:8082/ws".to_string(),
            display_name: "outpost".to_string(),
            auto_connect: true,
        }
    }
}

impl Settings {
    /// Load settings from the user config directory, falling back to
    /// defaults when no file exists.
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path())
    }

    /// Load settings from an explicit path.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the file exists but cannot be read or
    /// parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| Error::config(format!("parse {}: {e}", path.display())))
    }
}

/// `~/.config/.outpost/config.toml` (platform equivalent).
pub fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(OUTPOST_DIR).join(CONFIG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "display_name = \"ferris\"\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.display_name, "ferris");
        assert_eq!(settings.api_url, Settings::default().api_url);
        assert!(settings.auto_connect);
    }

    #[test]
    fn test_full_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        let written = Settings {
            api_url: "http://10.0.0.2:9000".to_string(),
            socket_url: "ws://10.0.0.2:9000/ws".to_string(),
            display_name: "base".to_string(),
            auto_connect: false,
        };
        std::fs::write(&path, toml::to_string(&written).unwrap()).unwrap();

        assert_eq!(Settings::load_from(&path).unwrap(), written);
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "auto_connect = \"definitely\"\n").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(err.is_fatal());
    }
}
