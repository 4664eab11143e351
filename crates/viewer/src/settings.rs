//! Viewer settings loaded from `viewer.ron` next to the executable.

use std::path::Path;

use engine_core::TerrainConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub window_width: u32,
    pub window_height: u32,
    pub fly_speed: f32,
    /// Sun azimuth/elevation in degrees.
    pub sun_azimuth: f32,
    pub sun_elevation: f32,
    pub shadow_cascades: u32,
    pub shadow_distance: f32,
    pub terrain: TerrainConfig,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            window_width: 1600,
            window_height: 900,
            fly_speed: 120.0,
            sun_azimuth: 135.0,
            sun_elevation: 40.0,
            shadow_cascades: 3,
            shadow_distance: 900.0,
            terrain: TerrainConfig::default(),
        }
    }
}

impl ViewerSettings {
    /// Load settings, falling back to defaults when the file is missing or
    /// fails to parse (with a log line, not a crash).
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match ron::from_str(&text) {
                Ok(settings) => {
                    log::info!("loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("failed to parse {}: {e}; using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn sun_direction(&self) -> glam::Vec3 {
        let azimuth = self.sun_azimuth.to_radians();
        let elevation = self.sun_elevation.to_radians();
        glam::Vec3::new(
            elevation.cos() * azimuth.cos(),
            elevation.sin(),
            elevation.cos() * azimuth.sin(),
        )
        .normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_ron() {
        let settings = ViewerSettings::default();
        let text = ron::to_string(&settings).unwrap();
        let back: ViewerSettings = ron::from_str(&text).unwrap();
        assert_eq!(back.terrain, settings.terrain);
        assert_eq!(back.fly_speed, settings.fly_speed);
    }

    #[test]
    fn sun_direction_points_up_at_high_elevation() {
        let settings = ViewerSettings {
            sun_elevation: 90.0,
            ..Default::default()
        };
        assert!(settings.sun_direction().y > 0.999);
    }
}
