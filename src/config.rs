//! Configuration management for floorviz

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::geometry::Quad;
use crate::layout::{fits_device_surface, Size};
use crate::warp::WarpGrid;

/// A room photo with the outline of its floor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub image_url: String,
    /// Floor corners in the photo's native pixels, TL, TR, BR, BL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<Quad>,
}

/// A selectable tile texture
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextureConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub texture_url: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

/// Surface and drawing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Initial container size in CSS pixels
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Device pixels per CSS pixel
    #[serde(default = "default_dpr")]
    pub device_pixel_ratio: f64,
    /// Zoom applied when a room is selected
    #[serde(default = "default_zoom")]
    pub default_zoom: f64,
    /// Warp mesh subdivision
    #[serde(default)]
    pub grid: WarpGrid,
    /// Quality for JPEG frames and snapshots (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Radius of the reveal handle in CSS pixels
    #[serde(default = "default_handle_radius")]
    pub handle_radius: f64,
    /// Largest surface side in device pixels; bigger resizes are refused
    #[serde(default = "default_max_surface_dimension")]
    pub max_surface_dimension: u32,
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_dpr() -> f64 {
    1.0
}

fn default_zoom() -> f64 {
    1.35
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_handle_radius() -> f64 {
    18.0
}

fn default_max_surface_dimension() -> u32 {
    8192
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            device_pixel_ratio: default_dpr(),
            default_zoom: default_zoom(),
            grid: WarpGrid::default(),
            jpeg_quality: default_jpeg_quality(),
            handle_radius: default_handle_radius(),
            max_surface_dimension: default_max_surface_dimension(),
        }
    }
}

/// Timing and resource limits of the interactive session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Delay between a texture selection settling and the generation request
    pub debounce_ms: u64,
    /// How long transient status messages stay visible
    pub status_ttl_ms: u64,
    /// Maximum number of decoded images kept in memory
    pub cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            status_ttl_ms: 3000,
            cache_capacity: 32,
        }
    }
}

/// Where image URLs are resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Directory for relative image URLs
    #[serde(default = "default_asset_root")]
    pub root: PathBuf,
    /// Fetch `http(s)` image URLs
    #[serde(default = "default_remote")]
    pub remote: bool,
}

fn default_asset_root() -> PathBuf {
    PathBuf::from("public")
}

fn default_remote() -> bool {
    true
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: default_asset_root(),
            remote: default_remote(),
        }
    }
}

/// External generation backend
///
/// `endpoint` takes precedence over `command`; with neither set only the
/// client-side preview is available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// HTTP endpoint receiving `{roomUrl, textureUrl}` and answering `{imageUrl}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Program to run per request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl GeneratorConfig {
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint().is_some() || self.command().is_some()
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub assets: AssetConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub rooms: Vec<RoomConfig>,

    #[serde(default)]
    pub textures: Vec<TextureConfig>,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            config.validate()?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Reject catalog entries the compositor could never draw
    pub fn validate(&self) -> Result<()> {
        for room in &self.rooms {
            if let Some(floor) = &room.floor {
                if floor.is_degenerate() {
                    tracing::warn!("Room {} has a degenerate floor outline; overlay will be skipped", room.id);
                }
            }
        }
        if self.render.device_pixel_ratio <= 0.0 || !self.render.device_pixel_ratio.is_finite() {
            anyhow::bail!("render.device_pixel_ratio must be positive");
        }
        if self.render.grid.cols == 0 || self.render.grid.rows == 0 {
            anyhow::bail!("render.grid must have at least one column and row");
        }
        let initial = Size::new(self.render.width as f64, self.render.height as f64);
        if !fits_device_surface(initial, self.render.device_pixel_ratio, self.render.max_surface_dimension) {
            anyhow::bail!(
                "render.width x render.height at the configured pixel ratio exceeds render.max_surface_dimension ({})",
                self.render.max_surface_dimension
            );
        }
        Ok(())
    }

    pub fn room(&self, id: &str) -> Option<&RoomConfig> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn texture(&self, id: &str) -> Option<&TextureConfig> {
        self.textures.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2D;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.debounce_ms, 400);
        assert_eq!(config.render.grid, WarpGrid { cols: 20, rows: 20 });
        assert_eq!(config.render.default_zoom, 1.35);
        assert!(config.generator.command.is_none());
    }

    #[test]
    fn test_parse_catalog() {
        let toml = r#"
            [[rooms]]
            id = "living"
            name = "Living Room"
            image_url = "/assets/living_room_2.jpg"
            floor = [
                { x = 200.0, y = 1400.0 },
                { x = 2400.0, y = 1400.0 },
                { x = 2600.0, y = 2000.0 },
                { x = 0.0, y = 2000.0 },
            ]

            [[textures]]
            id = "marble"
            texture_url = "/assets/tiles/marble.jpg"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let room = config.room("living").unwrap();
        assert_eq!(room.floor.unwrap().points()[2], Point2D::new(2600.0, 2000.0));
        assert_eq!(config.texture("marble").unwrap().texture_url, "/assets/tiles/marble.jpg");
        assert_eq!(config.server.port, 8092);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(reloaded.render.width, created.render.width);
        assert_eq!(reloaded.session.cache_capacity, created.session.cache_capacity);
    }

    #[test]
    fn test_partial_render_table_keeps_defaults() {
        let toml = r#"
            [render]
            jpeg_quality = 70

            [render.grid]
            cols = 8
            rows = 6
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!((config.render.width, config.render.height), (1280, 720));
        assert_eq!(config.render.grid, WarpGrid { cols: 8, rows: 6 });
        assert_eq!(config.render.jpeg_quality, 70);
        assert_eq!(config.render.max_surface_dimension, 8192);
        assert!(config.assets.remote);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_surface() {
        let mut config = Config::default();
        config.render.max_surface_dimension = 1024;
        assert!(config.validate().is_err());
        config.render.width = 1024;
        config.render.height = 768;
        assert!(config.validate().is_ok());
        config.render.device_pixel_ratio = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generator_enabled_by_endpoint_or_command() {
        let mut generator = GeneratorConfig::default();
        assert!(!generator.is_enabled());
        generator.command = Some("  ".into());
        assert!(!generator.is_enabled());
        generator.endpoint = Some("http://localhost:5000/api/visualize-tiles".into());
        assert!(generator.is_enabled());
    }

    #[test]
    fn test_rejects_zero_grid() {
        let mut config = Config::default();
        config.render.grid = WarpGrid { cols: 0, rows: 20 };
        assert!(config.validate().is_err());
    }
}
