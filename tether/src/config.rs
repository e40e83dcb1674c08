//! Configuration for both bridge roles.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tether_core::{
    BridgeError, BridgeSettings, ContainerPaths, Fps, KeepAliveSettings, VideoSettings,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Shared container location.
    pub container: ContainerConfig,
    /// Video channel settings.
    pub video: VideoConfig,
    /// Host liveness record.
    pub keep_alive: KeepAliveConfig,
    /// Synthetic capture source used by `tether extension`.
    pub extension: ExtensionConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Directory holding every app-group container.
    pub root: PathBuf,
    /// App-group identifier both processes share.
    pub app_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Requested frame rate; clamped to 15..=30.
    pub fps: u32,
    /// Size of the shared video cell in MiB.
    pub capacity_mib: usize,
    /// Deliver the same frame again when nothing new was written.
    pub deliver_duplicates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Refresh interval in milliseconds.
    pub interval_ms: u64,
    /// Missed intervals before the host counts as gone.
    pub stale_after: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Rate at which the synthetic source produces frames.
    pub source_fps: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Also send silent PCM audio.
    pub audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("tether"),
            app_group: "group.com.example.tether".into(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            capacity_mib: 10,
            deliver_duplicates: true,
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            stale_after: 5,
        }
    }
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            source_fps: 60,
            frame_width: 640,
            frame_height: 360,
            audio: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl BridgeConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// The configuration as a TOML document.
    pub fn to_toml(&self) -> Result<String, BridgeError> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Load `path`, falling back to defaults when it is absent or invalid.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                return Self::default();
            }
        };
        Self::parse(&text).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "{e}; using defaults");
            Self::default()
        })
    }

    /// Write the defaults to `path` for bootstrapping.
    pub fn write_default(path: &Path) -> Result<(), BridgeError> {
        std::fs::write(path, Self::default().to_toml()?)?;
        Ok(())
    }

    pub fn paths(&self) -> ContainerPaths {
        ContainerPaths::new(&self.container.root, &self.container.app_group)
    }

    /// Effective frame rate after clamping.
    pub fn fps(&self) -> Fps {
        Fps::new(self.video.fps)
    }

    /// Convert into the core's settings, clamping out-of-range values.
    pub fn to_settings(&self) -> BridgeSettings {
        BridgeSettings {
            paths: self.paths(),
            video: VideoSettings {
                capacity: self.video.capacity_mib.clamp(1, 64) * 1024 * 1024,
                deliver_duplicates: self.video.deliver_duplicates,
            },
            keep_alive: KeepAliveSettings {
                interval: Duration::from_millis(self.keep_alive.interval_ms.max(100)),
                stale_after: self.keep_alive.stale_after.max(1),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
