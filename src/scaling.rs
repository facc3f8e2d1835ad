//! Coordinate translation between the agent's declared space and the
//! physical framebuffer.
//!
//! Two policies exist. The normalized grid exposes a fixed 0–1000 space on
//! both axes regardless of the physical resolution. The default policy picks
//! a standard resolution with a matching aspect ratio and presents the
//! screen to the agent at that (smaller) size.

use serde::{Deserialize, Serialize};

use crate::result::ToolError;

/// Size of the normalized grid on each axis.
pub const NORMALIZED_GRID: u32 = 1000;

/// Aspect ratios closer than this are considered equal.
const ASPECT_TOLERANCE: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Standard targets the default policy scales down to.
pub const MAX_SCALING_TARGETS: [(&str, Resolution); 3] = [
    ("XGA", Resolution { width: 1024, height: 768 }),
    ("WXGA", Resolution { width: 1280, height: 800 }),
    ("FWXGA", Resolution { width: 1366, height: 768 }),
];

/// Which coordinate space a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingSource {
    /// Reported by the agent; scaled up to physical pixels.
    Api,
    /// Read from the remote machine; scaled down to the agent's space.
    Computer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Fixed 0–1000 grid on both axes.
    NormalizedGrid,
    /// Downscale to the closest standard resolution by aspect ratio.
    #[default]
    NearestStandard,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingConfig {
    /// Physical framebuffer width.
    pub width: u32,
    /// Physical framebuffer height.
    pub height: u32,
    pub display_num: Option<u32>,
    pub enabled: bool,
    pub mode: ScalingMode,
}

/// Stateless translator built from a [`ScalingConfig`].
#[derive(Debug, Clone, Copy)]
pub struct CoordinateScaler {
    config: ScalingConfig,
}

impl CoordinateScaler {
    pub fn new(config: ScalingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    /// The standard resolution the default policy scales to, if any.
    pub fn target(&self) -> Option<Resolution> {
        let ScalingConfig { width, height, .. } = self.config;
        if height == 0 {
            return None;
        }
        let ratio = f64::from(width) / f64::from(height);
        for (_, dim) in MAX_SCALING_TARGETS {
            let dim_ratio = f64::from(dim.width) / f64::from(dim.height);
            if (dim_ratio - ratio).abs() < ASPECT_TOLERANCE {
                // First aspect match wins, even when it is not a downscale.
                return (dim.width < width).then_some(dim);
            }
        }
        None
    }

    /// Translate `(x, y)` out of `source` space into the other space.
    pub fn scale(&self, source: ScalingSource, x: u32, y: u32) -> Result<(u32, u32), ToolError> {
        if !self.config.enabled {
            return Ok((x, y));
        }
        let (w, h) = (f64::from(self.config.width), f64::from(self.config.height));

        match self.config.mode {
            ScalingMode::NormalizedGrid => match source {
                ScalingSource::Api => {
                    let grid = f64::from(NORMALIZED_GRID);
                    Ok((round(f64::from(x) * w / grid), round(f64::from(y) * h / grid)))
                }
                ScalingSource::Computer => Ok((x, y)),
            },
            ScalingMode::NearestStandard => {
                let Some(target) = self.target() else {
                    return Ok((x, y));
                };
                let x_factor = f64::from(target.width) / w;
                let y_factor = f64::from(target.height) / h;
                match source {
                    ScalingSource::Api => {
                        if x > self.config.width || y > self.config.height {
                            return Err(ToolError::validation(format!(
                                "Coordinates {x}, {y} are out of bounds"
                            )));
                        }
                        Ok((round(f64::from(x) / x_factor), round(f64::from(y) / y_factor)))
                    }
                    ScalingSource::Computer => {
                        Ok((round(f64::from(x) * x_factor), round(f64::from(y) * y_factor)))
                    }
                }
            }
        }
    }

    /// Screen size as the agent should see it.
    pub fn agent_screen_size(&self) -> (u32, u32) {
        self.scale(ScalingSource::Computer, self.config.width, self.config.height)
            .unwrap_or((self.config.width, self.config.height))
    }
}

/// Round half away from zero and clamp into `u32`.
fn round(v: f64) -> u32 {
    v.round().clamp(0.0, f64::from(u32::MAX)) as u32
}
