//! Render configuration

use pdf_overlay_cache::RenderTarget;
use std::time::Duration;

/// A configuration value that failed validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid value for {key}: {reason}")]
pub struct InvalidConfig {
    pub key: &'static str,
    pub reason: String,
}

/// Configuration for the render scheduler and its worker pool
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// Upper bound on rasterizations running at the same time.
    /// Default: 4
    pub max_concurrent_renders: usize,

    /// Scale used for sidebar thumbnails.
    /// Default: 0.25
    pub thumbnail_scale: f32,

    /// Scale used for the interactive canvas.
    /// Default: 1.5
    pub canvas_scale: f32,

    /// How long an idle worker sleeps before looking for work again.
    /// Default: 10ms
    pub poll_interval: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_renders: 4,
            thumbnail_scale: 0.25,
            canvas_scale: 1.5,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl RenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_renders(mut self, max: usize) -> Self {
        self.max_concurrent_renders = max;
        self
    }

    pub fn with_thumbnail_scale(mut self, scale: f32) -> Self {
        self.thumbnail_scale = scale;
        self
    }

    pub fn with_canvas_scale(mut self, scale: f32) -> Self {
        self.canvas_scale = scale;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Fixed scale for a render target
    pub fn scale_for(&self, target: RenderTarget) -> f32 {
        match target {
            RenderTarget::Thumbnail => self.thumbnail_scale,
            RenderTarget::Canvas => self.canvas_scale,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.max_concurrent_renders == 0 {
            return Err(InvalidConfig {
                key: "max_concurrent_renders",
                reason: "must be at least 1".to_string(),
            });
        }
        for (key, scale) in [
            ("thumbnail_scale", self.thumbnail_scale),
            ("canvas_scale", self.canvas_scale),
        ] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(InvalidConfig {
                    key,
                    reason: format!("must be a positive number, got {scale}"),
                });
            }
        }
        Ok(())
    }
}
