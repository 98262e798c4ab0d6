//! Configuration for the Visor CLI host
//!
//! The host reads one TOML file: the `[core]` tables go to the runtime
//! unchanged, `[host]` describes where apps and state live on this machine,
//! and `[cli]` tunes the console. Every table is optional; a missing file
//! means defaults throughout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use visor_core::VisorConfig;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Host Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Routing core configuration (channels, wireless, bus, lifecycle, cloud)
    pub core: VisorConfig,

    /// Filesystem layout of this host
    pub host: HostConfig,

    /// Console behavior
    pub cli: CliConfig,
}

/// Where the host keeps apps and state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned for installed edge apps
    pub apps_dir: PathBuf,

    /// Directory for the token, catalog, and pid files
    ///
    /// Defaults to `~/.visor` when unset.
    pub state_dir: Option<PathBuf>,
}

/// Console behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Prompt printed before each console read
    pub prompt: String,

    /// Print transcripts as they arrive
    pub show_transcripts: bool,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            apps_dir: PathBuf::from("/opt/visor/apps"),
            state_dir: None,
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prompt: "visor> ".to_string(),
            show_transcripts: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: AppConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults
    ///
    /// The default file is `~/.visor/config.toml`; its absence is not an
    /// error.
    pub fn load_default() -> Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// The default configuration file path, if a home directory exists
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".visor").join("config.toml"))
    }

    /// The effective state directory
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.host.state_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".visor"))
            .ok_or_else(|| {
                CliError::Config("No home directory; set host.state_dir explicitly".to_string())
            })
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), rendered)?;
        Ok(())
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        self.core.validate().map_err(CliError::Core)?;

        if self.host.apps_dir.as_os_str().is_empty() {
            return Err(CliError::Config("host.apps_dir must not be empty".to_string()));
        }
        if self.cli.prompt.is_empty() {
            return Err(CliError::Config("cli.prompt must not be empty".to_string()));
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cli.prompt, "visor> ");
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[cli]\nprompt = \"core> \"\n\n[core.cloud]\nendpoint = \"wss://cloud.example/ws\"\naudio_queue_capacity = 50\n",
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.cli.prompt, "core> ");
        assert_eq!(config.core.cloud.endpoint, "wss://cloud.example/ws");
        // Untouched sections keep their defaults
        assert_eq!(config.core.bus.socket_path, visor_core::config::BusConfig::default().socket_path);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.cli.show_transcripts = false;
        config.host.state_dir = Some(dir.path().join("state"));
        config.save_to_file(&path).unwrap();

        let reloaded = AppConfig::load_from_file(&path).unwrap();
        assert!(!reloaded.cli.show_transcripts);
        assert_eq!(reloaded.state_dir().unwrap(), dir.path().join("state"));
    }

    #[test]
    fn test_invalid_cloud_endpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[core.cloud]\nendpoint = \"http://not-a-socket\"\naudio_queue_capacity = 10\n",
        )
        .unwrap();

        assert!(AppConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn test_explicit_state_dir_wins() {
        let config = AppConfig {
            host: HostConfig {
                state_dir: Some(PathBuf::from("/var/lib/visor")),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.state_dir().unwrap(), PathBuf::from("/var/lib/visor"));
    }
}
