//! Effect configuration, loadable from a JSON settings file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Construction-time configuration. All fields have defaults tuned for a
/// full-window cursor effect; a JSON file may override any subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplashConfig {
    /// Grid resolution of the velocity/pressure fields (smaller dimension).
    pub sim_resolution: u32,
    /// Grid resolution of the dye field (smaller dimension).
    pub dye_resolution: u32,
    /// Dye decay rate per second.
    pub density_dissipation: f32,
    /// Velocity decay rate per second.
    pub velocity_dissipation: f32,
    /// Pressure carry-over factor between frames, in [0, 1].
    pub pressure: f32,
    /// Jacobi relaxation iteration count for the pressure solve.
    pub pressure_iterations: u32,
    /// Vorticity confinement strength.
    pub curl: f32,
    /// Splat radius as a fraction of the screen, percent-scaled.
    pub splat_radius: f32,
    /// Multiplier from pointer delta to injected velocity.
    pub splat_force: f32,
    /// How fast the drag color cycles while the pointer moves.
    pub color_update_speed: f32,
    /// Pseudo-3D shading of the dye surface.
    pub shading: bool,
    /// Optional "#RRGGBB" palette. Empty means random HSV colors.
    pub colors: Vec<String>,
}

impl Default for SplashConfig {
    fn default() -> Self {
        Self {
            sim_resolution: 128,
            dye_resolution: 1024,
            density_dissipation: 3.5,
            velocity_dissipation: 2.0,
            pressure: 0.1,
            pressure_iterations: 20,
            curl: 3.0,
            splat_radius: 0.2,
            splat_force: 6000.0,
            color_update_speed: 10.0,
            shading: true,
            colors: Vec::new(),
        }
    }
}

impl SplashConfig {
    /// Reads settings from `path`. A missing file yields the defaults; a
    /// malformed file is an error the caller must surface.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
