// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Every field has a default, so a missing file or a partial file both work.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::frame::RendererSettings;

/// Where the active configuration came from.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    /// The file exists but could not be read or parsed; defaults are used.
    Invalid(anyhow::Error),
}

impl ConfigSource {
    pub fn log(&self, config: &Config) {
        match self {
            ConfigSource::File(path) => {
                log::info!("Loaded configuration from {:?}", path);
                log::debug!("Config: {:?}", config);
            }
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path);
            }
            ConfigSource::Invalid(e) => {
                log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            }
        }
    }
}

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings (the window is not resizable)
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Engine".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    /// Render target clear color, RGB in 0-1 (alpha is always 1)
    pub clear_color: [f32; 3],
    /// Upper bound on the per-frame fence and acquire waits.
    /// Absent = wait forever.
    pub fence_timeout_ms: Option<u64>,
    /// Compiled compute shader that fills the render target
    pub shader: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.1, 0.2, 0.8],
            fence_timeout_ms: None,
            shader: PathBuf::from("shaders/gradient.comp.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// Default log filter; RUST_LOG overrides it
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from config.toml, falling back to defaults.
    ///
    /// Runs before logging is configured, so nothing is logged here; pass
    /// the returned source to [`ConfigSource::log`] once the logger is up.
    pub fn load() -> (Self, ConfigSource) {
        Self::load_or_default("config.toml")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();

        if !path.exists() {
            return (Config::default(), ConfigSource::Missing(path.to_path_buf()));
        }

        match Self::load_from_path(path) {
            Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Frame wait timeouts; no configured timeout means unbounded.
    pub fn renderer_settings(&self) -> RendererSettings {
        let timeout_ns = self
            .graphics
            .fence_timeout_ms
            .map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000));

        RendererSettings {
            fence_timeout_ns: timeout_ns,
            acquire_timeout_ns: timeout_ns,
        }
    }

    pub fn clear_color(&self) -> glam::Vec3 {
        glam::Vec3::from_array(self.graphics.clear_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.debug.log_level, "info");
        assert_eq!(config.graphics.fence_timeout_ms, None);
        assert_eq!(config.graphics.shader, PathBuf::from("shaders/gradient.comp.spv"));
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Test"

            [graphics]
            present_mode = "fifo"
            clear_color = [1.0, 0.5, 0.0]
            fence_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Test");
        assert_eq!(config.window.height, 720);
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.clear_color(), glam::Vec3::new(1.0, 0.5, 0.0));
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn test_timeout_converts_to_nanoseconds() {
        let mut config = Config::default();
        assert_eq!(config.renderer_settings(), RendererSettings::default());

        config.graphics.fence_timeout_ms = Some(250);
        let settings = config.renderer_settings();
        assert_eq!(settings.fence_timeout_ns, 250_000_000);
        assert_eq!(settings.acquire_timeout_ns, 250_000_000);
    }

    #[test]
    fn test_unknown_present_mode_falls_back_to_fifo() {
        let mut config = Config::default();
        config.graphics.present_mode = "vsync-ish".to_string();
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);

        config.graphics.present_mode = "IMMEDIATE".to_string();
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::parse("[window\nwidth = ").is_err());
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let (config, source) = Config::load_or_default("no/such/config.toml");
        assert_eq!(config.graphics.present_mode, "mailbox");
        assert!(matches!(source, ConfigSource::Missing(_)));
    }

    #[test]
    fn test_invalid_file_keeps_error_for_later_logging() {
        let path = std::env::temp_dir().join(format!(
            "vulkan-engine-invalid-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[window]\nwidth = \"wide\"").unwrap();

        let (config, source) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 1280);
        match source {
            ConfigSource::Invalid(e) => {
                assert!(format!("{:#}", e).contains("Failed to parse config file"))
            }
            other => panic!("expected an invalid source, got {:?}", other),
        }
    }
}
