use crate::color::Palette;
use crate::types::Selection;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const POLLUTANT_PLACEHOLDER: &str = "{pollutant}";
/// Largest accepted panel width or height in pixels.
pub const MAX_RENDER_DIMENSION: u32 = 8192;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub properties: PropertyConfig,
    pub dashboard: DashboardConfig,
    pub render: RenderConfig,
    pub output: OutputConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "http://127.0.0.1:5000/".to_string(),
            timeout_secs: None,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Property-name templates on the prediction GeoJSON. `{pollutant}` is
/// replaced with the selected pollutant.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PropertyConfig {
    pub concentration: String,
    pub aqi: String,
    pub grid_id: String,
}

impl Default for PropertyConfig {
    fn default() -> Self {
        PropertyConfig {
            concentration: "{pollutant} Prediction mean".to_string(),
            aqi: "{pollutant} AQI".to_string(),
            grid_id: "Grid ID".to_string(),
        }
    }
}

impl PropertyConfig {
    pub fn concentration_for(&self, pollutant: &str) -> String {
        self.concentration.replace(POLLUTANT_PLACEHOLDER, pollutant)
    }

    pub fn aqi_for(&self, pollutant: &str) -> String {
        self.aqi.replace(POLLUTANT_PLACEHOLDER, pollutant)
    }

    fn validate(&self) -> Result<()> {
        for (key, pattern) in [("concentration", &self.concentration), ("aqi", &self.aqi)] {
            if !pattern.contains(POLLUTANT_PLACEHOLDER) {
                return Err(anyhow!(
                    "properties.{key} = {pattern:?} must contain {POLLUTANT_PLACEHOLDER}"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub selection: Selection,
    pub view_update_interval_ms: u64,
    pub status_poll_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            selection: Selection::default(),
            view_update_interval_ms: 250,
            status_poll_secs: 5,
        }
    }
}

impl DashboardConfig {
    pub fn view_update_interval(&self) -> Duration {
        Duration::from_millis(self.view_update_interval_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub fill_opacity: f64,
    pub feature_palette: Palette,
    pub baseline_palette: Palette,
    pub scenario_palette: Palette,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            width: 800,
            height: 800,
            fill_opacity: 0.7,
            feature_palette: Palette::WhiteToRed,
            baseline_palette: Palette::WhiteToRed,
            scenario_palette: Palette::WhiteToBlue,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 3000,
            static_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        config.properties.validate()?;
        for (key, value) in [("width", config.render.width), ("height", config.render.height)] {
            if value == 0 || value > MAX_RENDER_DIMENSION {
                return Err(anyhow!(
                    "render.{key} must be within 1..={MAX_RENDER_DIMENSION}, got {value}"
                ));
            }
        }
        if !(0.0..=1.0).contains(&config.render.fill_opacity) {
            return Err(anyhow!(
                "render.fill_opacity must be within 0..=1, got {}",
                config.render.fill_opacity
            ));
        }
        Ok(config)
    }
}
