//! # Hub Configuration
//!
//! Configuration management for the speaker hub.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CHORUS_GRPC_PORT=50051                                             │
//! │     CHORUS_EVENT_PREFIX=chorus_speaker_                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/chorus-hub/hub.toml (Linux)                              │
//! │     ~/Library/Application Support/com.chorus.hub/hub.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     port 50051, prefix "chorus_speaker_", max_speakers 10              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # hub.toml
//! [server]
//! grpc_port = 50051
//! bind_addr = "0.0.0.0"
//!
//! [events]
//! prefix = "chorus_speaker_"
//!
//! [limits]
//! max_speakers = 10
//!
//! [storage]
//! snapshot_path = "/var/lib/chorus-hub/speakers.json"
//! ```
//!
//! The protocol timing values (heartbeats, correlation window, eviction
//! threshold) are design constants compiled into the engine, not settings:
//! device firmware assumes them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HubError, HubResult};

// =============================================================================
// Server Settings
// =============================================================================

/// gRPC listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Port the speaker service listens on.
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// Bind address (default: 0.0.0.0 for all interfaces).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_grpc_port() -> u16 {
    50051
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            grpc_port: default_grpc_port(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl ServerSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.grpc_port)
    }
}

// =============================================================================
// Event Settings
// =============================================================================

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Prefix prepended to every event name emitted to the host bus.
    #[serde(default = "default_event_prefix")]
    pub prefix: String,
}

fn default_event_prefix() -> String {
    "chorus_speaker_".to_string()
}

impl Default for EventSettings {
    fn default() -> Self {
        EventSettings {
            prefix: default_event_prefix(),
        }
    }
}

// =============================================================================
// Limit Settings
// =============================================================================

/// Capacity expectations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Expected speaker count. Registration past this limit is admitted but
    /// logged as a warning; registration never rejects.
    #[serde(default = "default_max_speakers")]
    pub max_speakers: usize,
}

fn default_max_speakers() -> usize {
    10
}

impl Default for LimitSettings {
    fn default() -> Self {
        LimitSettings {
            max_speakers: default_max_speakers(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Registry snapshot storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path of the JSON registry snapshot. When unset, the platform data
    /// directory is used (falling back to the working directory).
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl StorageSettings {
    /// Resolves the snapshot path, applying platform defaults.
    pub fn resolve_snapshot_path(&self) -> PathBuf {
        if let Some(ref path) = self.snapshot_path {
            return path.clone();
        }

        directories::ProjectDirs::from("com", "chorus", "chorus-hub")
            .map(|dirs| dirs.data_dir().join("speakers.json"))
            .unwrap_or_else(|| PathBuf::from("speakers.json"))
    }
}

// =============================================================================
// Hub Configuration
// =============================================================================

/// Complete hub configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    /// gRPC listener settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Event bus settings.
    #[serde(default)]
    pub events: EventSettings,

    /// Capacity expectations.
    #[serde(default)]
    pub limits: LimitSettings,

    /// Snapshot storage settings.
    #[serde(default)]
    pub storage: StorageSettings,
}

impl HubConfig {
    /// Default config file path for this platform.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "chorus", "chorus-hub")
            .map(|dirs| dirs.config_dir().join("hub.toml"))
            .unwrap_or_else(|| PathBuf::from("hub.toml"))
    }

    /// Loads configuration from the given path (or the platform default),
    /// falling back to defaults when the file does not exist. Environment
    /// overrides are applied on top.
    pub fn load_or_default(path: Option<&Path>) -> HubResult<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| HubError::ConfigLoadFailed(format!("{}: {e}", path.display())))?;
            let parsed: HubConfig = toml::from_str(&raw)?;
            debug!(path = %path.display(), "Loaded hub config");
            parsed
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            HubConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `CHORUS_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("CHORUS_GRPC_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.server.grpc_port = p,
                Err(_) => warn!(value = %port, "Ignoring invalid CHORUS_GRPC_PORT"),
            }
        }

        if let Ok(addr) = std::env::var("CHORUS_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Ok(prefix) = std::env::var("CHORUS_EVENT_PREFIX") {
            self.events.prefix = prefix;
        }

        if let Ok(max) = std::env::var("CHORUS_MAX_SPEAKERS") {
            match max.parse::<usize>() {
                Ok(m) => self.limits.max_speakers = m,
                Err(_) => warn!(value = %max, "Ignoring invalid CHORUS_MAX_SPEAKERS"),
            }
        }

        if let Ok(path) = std::env::var("CHORUS_SNAPSHOT_PATH") {
            self.storage.snapshot_path = Some(PathBuf::from(path));
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> HubResult<()> {
        if self.server.grpc_port == 0 {
            return Err(HubError::InvalidConfig(
                "server.grpc_port must be non-zero".into(),
            ));
        }

        if self.events.prefix.is_empty() {
            return Err(HubError::InvalidConfig(
                "events.prefix must not be empty".into(),
            ));
        }

        if self.limits.max_speakers == 0 {
            return Err(HubError::InvalidConfig(
                "limits.max_speakers must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.server.grpc_port, 50051);
        assert_eq!(config.server.bind_addr, "0.0.0.0");
        assert_eq!(config.server.bind_address(), "0.0.0.0:50051");
        assert_eq!(config.events.prefix, "chorus_speaker_");
        assert_eq!(config.limits.max_speakers, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let raw = r#"
            [server]
            grpc_port = 50099

            [events]
            prefix = "lab_speaker_"
        "#;
        let config: HubConfig = toml::from_str(raw).expect("valid toml");
        assert_eq!(config.server.grpc_port, 50099);
        assert_eq!(config.events.prefix, "lab_speaker_");
        // Unspecified sections fall back to defaults
        assert_eq!(config.server.bind_addr, "0.0.0.0");
        assert_eq!(config.limits.max_speakers, 10);
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = HubConfig::default();
        config.server.grpc_port = 0;
        assert!(matches!(
            config.validate(),
            Err(HubError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let mut config = HubConfig::default();
        config.events.prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_snapshot_path_wins() {
        let settings = StorageSettings {
            snapshot_path: Some(PathBuf::from("/tmp/speakers.json")),
        };
        assert_eq!(
            settings.resolve_snapshot_path(),
            PathBuf::from("/tmp/speakers.json")
        );
    }
}
