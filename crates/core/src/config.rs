//! Editor configuration
//!
//! Settings can be built programmatically, read from environment variables,
//! or loaded from a JSON file. Every source starts from the defaults and
//! only overrides what it names.

use pdf_overlay_scheduler::{InvalidConfig, RenderConfig};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const ENV_MAX_RENDERS: &str = "PDF_OVERLAY_MAX_RENDERS";
pub const ENV_THUMBNAIL_SCALE: &str = "PDF_OVERLAY_THUMBNAIL_SCALE";
pub const ENV_CANVAS_SCALE: &str = "PDF_OVERLAY_CANVAS_SCALE";
pub const ENV_HISTORY_DEBOUNCE_MS: &str = "PDF_OVERLAY_HISTORY_DEBOUNCE_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config file: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<InvalidConfig> for ConfigError {
    fn from(err: InvalidConfig) -> Self {
        ConfigError::InvalidValue {
            key: err.key.to_string(),
            reason: err.reason,
        }
    }
}

/// Configuration for an [`Editor`](crate::Editor)
#[derive(Debug, Clone, PartialEq)]
pub struct EditorConfig {
    pub render: RenderConfig,

    /// Idle window after the last mutation before a history entry is
    /// committed. Must not be zero.
    /// Default: 100ms
    pub history_debounce: Duration,

    /// Default: 2.0
    pub default_stroke_width: f32,

    /// Default: 16.0
    pub default_font_size: f32,

    /// Content of a freshly placed text object.
    /// Default: "Text"
    pub default_text: String,

    /// Width images are placed at; height follows the aspect ratio.
    /// Default: 150.0
    pub image_insert_width: f32,

    /// Distance outside the viewport at which pages start rendering.
    /// Default: 200.0
    pub preload_margin: f32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            render: RenderConfig::default(),
            history_debounce: Duration::from_millis(100),
            default_stroke_width: 2.0,
            default_font_size: 16.0,
            default_text: "Text".to_string(),
            image_insert_width: 150.0,
            preload_margin: 200.0,
        }
    }
}

/// On-disk shape of the config file; absent keys keep their defaults
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    max_concurrent_renders: Option<usize>,
    thumbnail_scale: Option<f32>,
    canvas_scale: Option<f32>,
    history_debounce_ms: Option<u64>,
    default_stroke_width: Option<f32>,
    default_font_size: Option<f32>,
    default_text: Option<String>,
    image_insert_width: Option<f32>,
    preload_margin: Option<f32>,
}

impl EditorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_render(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    pub fn with_history_debounce(mut self, debounce: Duration) -> Self {
        self.history_debounce = debounce;
        self
    }

    pub fn with_preload_margin(mut self, margin: f32) -> Self {
        self.preload_margin = margin;
        self
    }

    /// Defaults overridden by environment variables.
    ///
    /// Environment variables:
    /// - `PDF_OVERLAY_MAX_RENDERS`: concurrent render bound (default: 4)
    /// - `PDF_OVERLAY_THUMBNAIL_SCALE`: thumbnail scale (default: 0.25)
    /// - `PDF_OVERLAY_CANVAS_SCALE`: canvas scale (default: 1.5)
    /// - `PDF_OVERLAY_HISTORY_DEBOUNCE_MS`: history window in ms (default: 100)
    ///
    /// # Errors
    /// Returns an error if a variable does not parse or fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(max) = env_value::<usize>(ENV_MAX_RENDERS)? {
            config.render.max_concurrent_renders = max;
        }
        if let Some(scale) = env_value::<f32>(ENV_THUMBNAIL_SCALE)? {
            config.render.thumbnail_scale = scale;
        }
        if let Some(scale) = env_value::<f32>(ENV_CANVAS_SCALE)? {
            config.render.canvas_scale = scale;
        }
        if let Some(ms) = env_value::<u64>(ENV_HISTORY_DEBOUNCE_MS)? {
            config.history_debounce = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    ///
    /// ```json
    /// { "max_concurrent_renders": 2, "history_debounce_ms": 250 }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let mut config = Self::default();

        if let Some(max) = file.max_concurrent_renders {
            config.render.max_concurrent_renders = max;
        }
        if let Some(scale) = file.thumbnail_scale {
            config.render.thumbnail_scale = scale;
        }
        if let Some(scale) = file.canvas_scale {
            config.render.canvas_scale = scale;
        }
        if let Some(ms) = file.history_debounce_ms {
            config.history_debounce = Duration::from_millis(ms);
        }
        if let Some(width) = file.default_stroke_width {
            config.default_stroke_width = width;
        }
        if let Some(size) = file.default_font_size {
            config.default_font_size = size;
        }
        if let Some(text) = file.default_text {
            config.default_text = text;
        }
        if let Some(width) = file.image_insert_width {
            config.image_insert_width = width;
        }
        if let Some(margin) = file.preload_margin {
            config.preload_margin = margin;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.render.validate()?;
        if self.history_debounce.is_zero() {
            return Err(invalid("history_debounce", "must not be zero"));
        }
        for (key, value) in [
            ("default_font_size", self.default_font_size),
            ("image_insert_width", self.image_insert_width),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(key, format!("must be a positive number, got {value}")));
            }
        }
        for (key, value) in [
            ("default_stroke_width", self.default_stroke_width),
            ("preload_margin", self.preload_margin),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, format!("must not be negative, got {value}")));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(name, format!("cannot parse {raw:?}"))),
        Err(_) => Ok(None),
    }
}
