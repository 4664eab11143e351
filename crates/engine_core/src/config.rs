//! Configuration for terrain generation and rendering.
//!
//! The split between these structs mirrors the live-update contract: anything
//! in [`NoiseConfig`], [`ErosionConfig`] or the island mask resolution needs a
//! generation pass; [`MaterialConfig`], [`DetailConfig`] and the island toggle
//! only touch uniforms and take effect next frame.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TerrainError};

/// Parameters for the FBM noise compute kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Heightfield resolution per side. Must be a power of two.
    pub resolution: u32,
    /// Sample-space offset, for scrolling the noise field.
    pub offset: [f32; 2],
    /// Sample-space scale (higher = more features across the terrain).
    pub scale: [f32; 2],
    /// Number of FBM layers, 0-10. 0 produces a flat (all-zero) field.
    pub octaves: u32,
    /// Amplitude multiplier per octave.
    pub persistence: f32,
    /// Frequency multiplier per octave.
    pub lacunarity: f32,
    /// Seed for the hash-based value noise.
    pub seed: u32,
    /// Strength of the domain pre-warp. 0 disables warping.
    pub warp_strength: f32,
    /// Sample-space scale of the warp FBM.
    pub warp_scale: [f32; 2],
    /// Octaves of the warp FBM, 1-3.
    pub warp_octaves: u32,
    /// Blend between plain FBM (0) and ridged FBM (1).
    pub ridge_weight: f32,
    /// Rotate each octave's sample frame to break up axis-aligned artifacts.
    pub rotate_octaves: bool,
    /// Per-octave rotation in degrees (octave k rotates by k times this).
    pub octave_rotation_deg: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            resolution: 1024,
            offset: [0.0, 0.0],
            scale: [1.6, 1.6],
            octaves: 6,
            persistence: 0.5,
            lacunarity: 2.0,
            seed: 1337,
            warp_strength: 0.12,
            warp_scale: [0.7, 0.7],
            warp_octaves: 2,
            ridge_weight: 0.35,
            rotate_octaves: true,
            octave_rotation_deg: 36.0,
        }
    }
}

impl NoiseConfig {
    /// Reject invalid parameters before anything is submitted to the GPU.
    pub fn validate(&self) -> Result<()> {
        if !self.resolution.is_power_of_two() || !(64..=8192).contains(&self.resolution) {
            return Err(TerrainError::Config(format!(
                "heightfield resolution must be a power of two in 64..=8192, got {}",
                self.resolution
            )));
        }
        if self.octaves > 10 {
            return Err(TerrainError::Config(format!(
                "octaves must be in 0..=10, got {}",
                self.octaves
            )));
        }
        if !(1..=3).contains(&self.warp_octaves) {
            return Err(TerrainError::Config(format!(
                "warp octaves must be in 1..=3, got {}",
                self.warp_octaves
            )));
        }
        if !(0.0..=1.0).contains(&self.ridge_weight) {
            return Err(TerrainError::Config(format!(
                "ridge weight must be in 0..=1, got {}",
                self.ridge_weight
            )));
        }
        Ok(())
    }
}

/// Parameters for hydraulic droplet and thermal erosion.
///
/// Droplet counts, lifetime and rates are specified at the 1024 reference
/// resolution; the simulator rescales them for other resolutions so results
/// look comparable regardless of texel density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErosionConfig {
    /// Hydraulic iterations per generation (each iteration is one droplet swarm).
    pub hydraulic_iterations: u32,
    /// Droplets per iteration at the 1024 reference resolution.
    pub droplets_per_iteration: u32,
    /// Maximum droplet walk length at the reference resolution.
    pub max_droplet_lifetime: u32,
    /// Blend between previous direction (1) and downhill gradient (0).
    pub inertia: f32,
    /// Downhill acceleration applied to droplet speed.
    pub gravity: f32,
    /// Sediment capacity multiplier (slope * speed * water * this).
    pub sediment_capacity: f32,
    /// Lower bound on capacity so droplets keep carrying on flats.
    pub min_capacity: f32,
    /// Slope below which a droplet deposits instead of eroding.
    pub min_slope: f32,
    /// Fraction of excess sediment dropped per step.
    pub deposition_rate: f32,
    /// Fraction of remaining capacity eroded per step.
    pub erosion_rate: f32,
    /// Water lost per step.
    pub evaporation_rate: f32,
    /// Radius in texels of the Gaussian erosion/deposit brush.
    pub brush_radius: u32,
    /// Extra scale on erode amounts relative to the normalized height range.
    pub height_scale_factor: f32,
    /// Thermal iterations per generation.
    pub thermal_iterations: u32,
    /// Height difference per texel above which material slides (talus slope).
    pub talus_angle: f32,
    /// Fraction of the excess difference moved per thermal iteration.
    pub thermal_rate: f32,
}

impl Default for ErosionConfig {
    fn default() -> Self {
        Self {
            hydraulic_iterations: 30,
            droplets_per_iteration: 20_000,
            max_droplet_lifetime: 64,
            inertia: 0.05,
            gravity: 4.0,
            sediment_capacity: 4.0,
            min_capacity: 0.01,
            min_slope: 0.005,
            deposition_rate: 0.3,
            erosion_rate: 0.3,
            evaporation_rate: 0.02,
            brush_radius: 3,
            height_scale_factor: 1.0,
            thermal_iterations: 20,
            talus_angle: 0.0016,
            thermal_rate: 0.5,
        }
    }
}

impl ErosionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.brush_radius == 0 || self.brush_radius > 8 {
            return Err(TerrainError::Config(format!(
                "brush radius must be in 1..=8, got {}",
                self.brush_radius
            )));
        }
        if !(0.0..1.0).contains(&self.evaporation_rate) {
            return Err(TerrainError::Config(format!(
                "evaporation rate must be in [0, 1), got {}",
                self.evaporation_rate
            )));
        }
        Ok(())
    }
}

/// Island mask generation and render-time ocean blend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IslandConfig {
    /// When false the mask is ignored at render time.
    pub enabled: bool,
    /// Radius of the island in normalized terrain space (0.5 = edge).
    pub radius: f32,
    /// Width of the coast transition band.
    pub coast_falloff: f32,
    /// Strength of the low-frequency coastline perturbation.
    pub coast_noise_strength: f32,
    /// Normalized height the ocean floor is clamped toward.
    pub sea_floor_depth: f32,
    /// Seed for the coastline noise.
    pub seed: u32,
}

impl Default for IslandConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 0.35,
            coast_falloff: 0.1,
            coast_noise_strength: 0.08,
            sea_floor_depth: -0.3,
            seed: 7,
        }
    }
}

/// Biome colors and blend thresholds for the patch fragment shader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialConfig {
    pub grass_color: [f32; 3],
    pub rock_color: [f32; 3],
    pub snow_color: [f32; 3],
    pub dirt_color: [f32; 3],
    pub beach_color: [f32; 3],
    /// Normalized height above which snow takes over.
    pub snow_height: f32,
    /// Normalized height below which beach sand shows.
    pub beach_height: f32,
    /// Slope (1 - normal.y) above which rock takes over.
    pub rock_slope: f32,
    /// Exponent sharpening the biome blend weights.
    pub blend_sharpness: f32,
}

impl Default for MaterialConfig {
    fn default() -> Self {
        Self {
            grass_color: [0.22, 0.38, 0.16],
            rock_color: [0.38, 0.36, 0.34],
            snow_color: [0.92, 0.93, 0.95],
            dirt_color: [0.32, 0.24, 0.16],
            beach_color: [0.76, 0.70, 0.50],
            snow_height: 0.32,
            beach_height: 0.02,
            rock_slope: 0.45,
            blend_sharpness: 4.0,
        }
    }
}

/// High-frequency albedo perturbation applied per fragment. Live uniform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailConfig {
    pub amplitude: f32,
    pub scale: f32,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            amplitude: 0.08,
            scale: 48.0,
        }
    }
}

/// Top-level terrain configuration owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainConfig {
    /// World-space side length of the terrain square, centered at origin.
    pub world_size: f32,
    /// World height = normalized sample * this.
    pub height_scale: f32,
    /// Vertices per side of the shared patch grid. Must be odd so morph
    /// snap positions land exactly on a subset of child vertices.
    pub grid_size: u32,
    /// Depth of the CDLOD quadtree.
    pub max_lod_levels: u32,
    /// Nodes are not subdivided below this world-space size.
    pub min_node_size: f32,
    /// Split threshold = node size * this.
    pub lod_distance_multiplier: f32,
    /// Fraction of the split range over which patches morph toward the parent.
    pub morph_region: f32,
    /// Skirt drop as a fraction of the patch world size.
    pub skirt_depth: f32,
    /// Upper bound on patches uploaded per frame; excess is truncated.
    pub max_instances: u32,
    /// Multiplier on normal-map gradients.
    pub normal_strength: f32,
    /// Copy the finished heightfield back to the CPU for height queries.
    pub readback: bool,
    pub noise: NoiseConfig,
    pub erosion: ErosionConfig,
    pub island: IslandConfig,
    pub material: MaterialConfig,
    pub detail: DetailConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            world_size: 1024.0,
            height_scale: 180.0,
            grid_size: 129,
            max_lod_levels: 7,
            min_node_size: 4.0,
            lod_distance_multiplier: 2.0,
            morph_region: 0.3,
            skirt_depth: 0.05,
            max_instances: 512,
            normal_strength: 1.0,
            readback: true,
            noise: NoiseConfig::default(),
            erosion: ErosionConfig::default(),
            island: IslandConfig::default(),
            material: MaterialConfig::default(),
            detail: DetailConfig::default(),
        }
    }
}

impl TerrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grid_size < 3 || self.grid_size % 2 == 0 {
            return Err(TerrainError::Config(format!(
                "grid size must be odd and at least 3, got {}",
                self.grid_size
            )));
        }
        if self.world_size <= 0.0 {
            return Err(TerrainError::Config(format!(
                "world size must be positive, got {}",
                self.world_size
            )));
        }
        if self.max_lod_levels == 0 || self.max_lod_levels > 16 {
            return Err(TerrainError::Config(format!(
                "lod levels must be in 1..=16, got {}",
                self.max_lod_levels
            )));
        }
        if !(0.0..1.0).contains(&self.morph_region) || self.morph_region <= 0.0 {
            return Err(TerrainError::Config(format!(
                "morph region must be in (0, 1), got {}",
                self.morph_region
            )));
        }
        self.noise.validate()?;
        self.erosion.validate()?;
        Ok(())
    }

    /// Deep-merge a partial update. Unset fields keep their current values.
    pub fn apply(&mut self, patch: &TerrainConfigPatch) {
        if let Some(v) = patch.world_size {
            self.world_size = v;
        }
        if let Some(v) = patch.height_scale {
            self.height_scale = v;
        }
        if let Some(v) = patch.normal_strength {
            self.normal_strength = v;
        }
        if let Some(p) = &patch.noise {
            self.noise.apply(p);
        }
        if let Some(p) = &patch.erosion {
            self.erosion.apply(p);
        }
        if let Some(v) = &patch.island {
            self.island = v.clone();
        }
        if let Some(v) = &patch.material {
            self.material = v.clone();
        }
        if let Some(v) = &patch.detail {
            self.detail = v.clone();
        }
    }
}

/// Partial update for [`TerrainConfig`]. Sections that are themselves merged
/// field-by-field get their own patch type; the uniform-only sections are
/// small enough to replace wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainConfigPatch {
    pub world_size: Option<f32>,
    pub height_scale: Option<f32>,
    pub normal_strength: Option<f32>,
    pub noise: Option<NoisePatch>,
    pub erosion: Option<ErosionPatch>,
    pub island: Option<IslandConfig>,
    pub material: Option<MaterialConfig>,
    pub detail: Option<DetailConfig>,
}

/// Field-wise partial update for [`NoiseConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoisePatch {
    pub resolution: Option<u32>,
    pub offset: Option<[f32; 2]>,
    pub scale: Option<[f32; 2]>,
    pub octaves: Option<u32>,
    pub persistence: Option<f32>,
    pub lacunarity: Option<f32>,
    pub seed: Option<u32>,
    pub warp_strength: Option<f32>,
    pub warp_scale: Option<[f32; 2]>,
    pub warp_octaves: Option<u32>,
    pub ridge_weight: Option<f32>,
    pub rotate_octaves: Option<bool>,
    pub octave_rotation_deg: Option<f32>,
}

impl NoiseConfig {
    pub fn apply(&mut self, patch: &NoisePatch) {
        if let Some(v) = patch.resolution {
            self.resolution = v;
        }
        if let Some(v) = patch.offset {
            self.offset = v;
        }
        if let Some(v) = patch.scale {
            self.scale = v;
        }
        if let Some(v) = patch.octaves {
            self.octaves = v;
        }
        if let Some(v) = patch.persistence {
            self.persistence = v;
        }
        if let Some(v) = patch.lacunarity {
            self.lacunarity = v;
        }
        if let Some(v) = patch.seed {
            self.seed = v;
        }
        if let Some(v) = patch.warp_strength {
            self.warp_strength = v;
        }
        if let Some(v) = patch.warp_scale {
            self.warp_scale = v;
        }
        if let Some(v) = patch.warp_octaves {
            self.warp_octaves = v;
        }
        if let Some(v) = patch.ridge_weight {
            self.ridge_weight = v;
        }
        if let Some(v) = patch.rotate_octaves {
            self.rotate_octaves = v;
        }
        if let Some(v) = patch.octave_rotation_deg {
            self.octave_rotation_deg = v;
        }
    }
}

/// Field-wise partial update for [`ErosionConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErosionPatch {
    pub hydraulic_iterations: Option<u32>,
    pub droplets_per_iteration: Option<u32>,
    pub max_droplet_lifetime: Option<u32>,
    pub inertia: Option<f32>,
    pub gravity: Option<f32>,
    pub sediment_capacity: Option<f32>,
    pub min_capacity: Option<f32>,
    pub min_slope: Option<f32>,
    pub deposition_rate: Option<f32>,
    pub erosion_rate: Option<f32>,
    pub evaporation_rate: Option<f32>,
    pub brush_radius: Option<u32>,
    pub height_scale_factor: Option<f32>,
    pub thermal_iterations: Option<u32>,
    pub talus_angle: Option<f32>,
    pub thermal_rate: Option<f32>,
}

impl ErosionConfig {
    pub fn apply(&mut self, patch: &ErosionPatch) {
        if let Some(v) = patch.hydraulic_iterations {
            self.hydraulic_iterations = v;
        }
        if let Some(v) = patch.droplets_per_iteration {
            self.droplets_per_iteration = v;
        }
        if let Some(v) = patch.max_droplet_lifetime {
            self.max_droplet_lifetime = v;
        }
        if let Some(v) = patch.inertia {
            self.inertia = v;
        }
        if let Some(v) = patch.gravity {
            self.gravity = v;
        }
        if let Some(v) = patch.sediment_capacity {
            self.sediment_capacity = v;
        }
        if let Some(v) = patch.min_capacity {
            self.min_capacity = v;
        }
        if let Some(v) = patch.min_slope {
            self.min_slope = v;
        }
        if let Some(v) = patch.deposition_rate {
            self.deposition_rate = v;
        }
        if let Some(v) = patch.erosion_rate {
            self.erosion_rate = v;
        }
        if let Some(v) = patch.evaporation_rate {
            self.evaporation_rate = v;
        }
        if let Some(v) = patch.brush_radius {
            self.brush_radius = v;
        }
        if let Some(v) = patch.height_scale_factor {
            self.height_scale_factor = v;
        }
        if let Some(v) = patch.thermal_iterations {
            self.thermal_iterations = v;
        }
        if let Some(v) = patch.talus_angle {
            self.talus_angle = v;
        }
        if let Some(v) = patch.thermal_rate {
            self.thermal_rate = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        TerrainConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_resolution() {
        let mut config = TerrainConfig::default();
        config.noise.resolution = 1000;
        assert!(matches!(
            config.validate(),
            Err(TerrainError::Config(_))
        ));
    }

    #[test]
    fn rejects_even_grid_size() {
        let mut config = TerrainConfig::default();
        config.grid_size = 128;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_excess_octaves() {
        let mut config = NoiseConfig::default();
        config.octaves = 11;
        assert!(config.validate().is_err());
        config.octaves = 0; // flat terrain is allowed
        assert!(config.validate().is_ok());
    }

    /// A patch only overwrites the fields it sets.
    #[test]
    fn patch_merges_deeply() {
        let mut config = TerrainConfig::default();
        let before = config.clone();
        config.apply(&TerrainConfigPatch {
            height_scale: Some(90.0),
            noise: Some(NoisePatch {
                seed: Some(42),
                octaves: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(config.height_scale, 90.0);
        assert_eq!(config.noise.seed, 42);
        assert_eq!(config.noise.octaves, 3);
        // everything else untouched
        assert_eq!(config.world_size, before.world_size);
        assert_eq!(config.noise.persistence, before.noise.persistence);
        assert_eq!(config.erosion, before.erosion);
    }

    #[test]
    fn empty_patch_is_identity() {
        let mut config = TerrainConfig::default();
        let before = config.clone();
        config.apply(&TerrainConfigPatch::default());
        assert_eq!(config, before);
    }
}
