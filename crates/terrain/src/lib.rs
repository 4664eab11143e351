//! Terrain orchestrator.
//!
//! [`TerrainManager`] owns every GPU resource of the terrain core, wires the
//! generation pipeline (noise, erosion, mipmaps, normals, island mask) to the
//! renderer and shadow pass, and exposes the live-parameter setters. The CPU
//! side is single-threaded and cooperative: the only blocking points are the
//! explicit `device.poll(Maintain::Wait)` calls between generation stages.

use std::sync::Arc;

use engine_core::{
    DetailConfig, IslandConfig, MaterialConfig, NoiseConfig, Result, TerrainConfig,
    TerrainConfigPatch, TerrainError,
};
use glam::{Mat4, Vec3};
use procgen::{
    create_island_texture, create_normal_texture, ErosionSimulator, Heightfield,
    HeightmapGenerator, HeightSampler, IslandMaskGenerator, MipmapGenerator, NormalMapGenerator,
};
use renderer::{
    CascadeParams, FrameParams, LightParams, Quadtree, QuadtreeConfig, SelectParams, ShadowPass,
    TerrainRenderer, Texture, SHADOW_FORMAT, SHADOW_SLOT_COUNT,
};

/// Erosion iterations submitted between progress reports and GPU waits.
const EROSION_BATCH: u32 = 5;
/// Shadow cascade depth resolution.
const SHADOW_MAP_SIZE: u32 = 2048;

/// Per-frame inputs supplied by the host for the main pass.
#[derive(Debug, Clone, Copy)]
pub struct RenderParams {
    pub view_proj: Mat4,
    pub model: Mat4,
    pub camera_pos: Vec3,
    pub light: LightParams,
    /// Cascade matrices/splits for shadow sampling; `None` disables shadows.
    pub cascades: Option<CascadeParams>,
    /// Capability mask bit: bind the scene-environment ambient term.
    pub use_scene_ambient: bool,
    pub wireframe: bool,
    pub debug_lod: bool,
}

/// Selection statistics from the last main-pass selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionStats {
    pub selected: u32,
    pub considered: u32,
    pub culled: u32,
    pub truncated: u32,
}

pub struct TerrainManager {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: TerrainConfig,

    heightmap_gen: HeightmapGenerator,
    mipmaps: MipmapGenerator,
    normal_gen: NormalMapGenerator,
    island_gen: IslandMaskGenerator,
    erosion: ErosionSimulator,

    heightfield: Heightfield,
    normal_map: wgpu::TextureView,
    island_mask: Option<wgpu::TextureView>,
    fallback_height: Texture,
    fallback_normal: Texture,
    fallback_island: Texture,

    patch_renderer: TerrainRenderer,
    shadow_pass: ShadowPass,
    shadow_layer_views: Vec<wgpu::TextureView>,
    shadow_array_view: wgpu::TextureView,

    quadtree: Quadtree,
    height_sampler: Option<HeightSampler>,
    stats: SelectionStats,

    initialized: bool,
    is_generating: bool,
    generated: bool,
}

impl TerrainManager {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, config: TerrainConfig) -> Result<Self> {
        config.validate()?;
        let resolution = config.noise.resolution;

        let heightmap_gen = HeightmapGenerator::new(&device);
        let mipmaps = MipmapGenerator::new(&device);
        let normal_gen = NormalMapGenerator::new(&device);
        let island_gen = IslandMaskGenerator::new(&device);
        let erosion = ErosionSimulator::new(&device, resolution)?;

        let heightfield = Heightfield::new(&device, resolution, "Terrain Heightfield")?;
        let normal_map = create_normal_texture(&device, resolution)
            .create_view(&wgpu::TextureViewDescriptor::default());

        let fallback_height = Texture::default_height(&device, &queue);
        let fallback_normal = Texture::default_normal(&device, &queue);
        let fallback_island = Texture::default_island(&device, &queue);

        let mut patch_renderer =
            TerrainRenderer::new(&device, config.grid_size, config.max_instances)?;
        let mut shadow_pass = ShadowPass::new(&device, config.max_instances);
        let (_shadow_texture, shadow_array_view, shadow_layer_views) =
            Texture::create_shadow_array(&device, SHADOW_MAP_SIZE, SHADOW_SLOT_COUNT, SHADOW_FORMAT);

        // Until the first generation completes, every map is a 1x1 fallback:
        // flat height, straight-up normal, fully-land mask.
        patch_renderer.bind_textures(
            &device,
            &fallback_height.view,
            &fallback_normal.view,
            &fallback_island.view,
            &shadow_array_view,
        );
        shadow_pass.bind_heightmap(&device, &fallback_height.view);

        let quadtree = Quadtree::new(Self::quadtree_config(&config));

        log::info!(
            "terrain manager created: world {}m, heightfield {}x{}, {} LOD levels",
            config.world_size,
            resolution,
            resolution,
            config.max_lod_levels
        );

        Ok(Self {
            device,
            queue,
            config,
            heightmap_gen,
            mipmaps,
            normal_gen,
            island_gen,
            erosion,
            heightfield,
            normal_map,
            island_mask: None,
            fallback_height,
            fallback_normal,
            fallback_island,
            patch_renderer,
            shadow_pass,
            shadow_layer_views,
            shadow_array_view,
            quadtree,
            height_sampler: None,
            stats: SelectionStats::default(),
            initialized: true,
            is_generating: false,
            generated: false,
        })
    }

    fn quadtree_config(config: &TerrainConfig) -> QuadtreeConfig {
        // Vertical bounds get a 20% margin over the nominal height range so
        // erosion deposits poking past it never flicker out of the frustum.
        let half = config.height_scale * 0.6;
        QuadtreeConfig {
            world_size: config.world_size,
            min_node_size: config.min_node_size,
            max_lod_levels: config.max_lod_levels,
            min_height: -half,
            max_height: half,
        }
    }

    /// Reconstruct GPU state after a device error. Idempotent: a healthy
    /// manager returns immediately.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let resolution = self.config.noise.resolution;
        self.erosion = ErosionSimulator::new(&self.device, resolution)?;
        self.heightfield = Heightfield::new(&self.device, resolution, "Terrain Heightfield")?;
        self.normal_map = create_normal_texture(&self.device, resolution)
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.island_mask = None;
        self.height_sampler = None;
        self.generated = false;
        self.rebind_textures();
        self.initialized = true;
        Ok(())
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating
    }

    pub fn stats(&self) -> SelectionStats {
        self.stats
    }

    /// Depth view the host attaches for cascade `slot`.
    pub fn shadow_layer_view(&self, slot: u32) -> &wgpu::TextureView {
        &self.shadow_layer_views[slot as usize]
    }

    fn rebind_textures(&mut self) {
        let (height_view, normal_view) = if self.generated {
            (self.heightfield.view(), &self.normal_map)
        } else {
            (&self.fallback_height.view, &self.fallback_normal.view)
        };
        let island_view = self.island_mask.as_ref().unwrap_or(&self.fallback_island.view);
        self.patch_renderer.bind_textures(
            &self.device,
            height_view,
            normal_view,
            island_view,
            &self.shadow_array_view,
        );
        self.shadow_pass.bind_heightmap(&self.device, height_view);
    }

    /// Run the full generation pipeline. `progress` receives
    /// `(stage name, percent)` at well-defined milestones. Single-flight: a
    /// reentrant call is logged and rejected.
    pub fn generate(&mut self, progress: &mut dyn FnMut(&str, u32)) -> Result<()> {
        if !self.initialized {
            return Err(TerrainError::State(
                "generate called before initialization".into(),
            ));
        }
        if self.is_generating {
            log::warn!("generate called while a generation is already running; ignored");
            return Err(TerrainError::State("generation already in progress".into()));
        }
        self.is_generating = true;
        let result = self.run_generation(progress);
        self.is_generating = false;
        if matches!(result, Err(TerrainError::GpuExecution(_))) {
            self.initialized = false;
        }
        result
    }

    fn run_generation(&mut self, progress: &mut dyn FnMut(&str, u32)) -> Result<()> {
        let started = std::time::Instant::now();
        let config = self.config.clone();

        progress("noise", 0);
        self.heightmap_gen.generate(
            &self.device,
            &self.queue,
            &self.heightfield,
            &self.mipmaps,
            &config.noise,
        )?;
        self.device.poll(wgpu::Maintain::Wait);
        progress("noise", 100);
        log::debug!("noise stage done in {:?}", started.elapsed());

        let hydraulic = config.erosion.hydraulic_iterations;
        let thermal = config.erosion.thermal_iterations;
        if hydraulic > 0 || thermal > 0 {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Erosion Load Encoder"),
                });
            self.erosion.load_from(&mut encoder, &self.heightfield);
            self.queue.submit(std::iter::once(encoder.finish()));

            // Erosion runs in small batches so long simulations stay
            // responsive to progress reporting.
            let mut done = 0;
            while done < hydraulic {
                let batch = EROSION_BATCH.min(hydraulic - done);
                for _ in 0..batch {
                    self.erosion.hydraulic_iteration(
                        &self.device,
                        &self.queue,
                        &config.erosion,
                        config.noise.seed,
                    );
                }
                done += batch;
                self.device.poll(wgpu::Maintain::Wait);
                progress("hydraulic erosion", done * 100 / hydraulic);
            }

            done = 0;
            while done < thermal {
                let batch = EROSION_BATCH.min(thermal - done);
                for _ in 0..batch {
                    self.erosion
                        .thermal_iteration(&self.device, &self.queue, &config.erosion);
                }
                done += batch;
                self.device.poll(wgpu::Maintain::Wait);
                progress("thermal erosion", done * 100 / thermal);
            }

            // Fold the eroded result back into the canonical heightfield and
            // rebuild the now-stale mip chain.
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Erosion Resolve Encoder"),
                });
            self.erosion.resolve_into(&mut encoder, &self.heightfield);
            self.mipmaps.record(&self.device, &mut encoder, &self.heightfield);
            self.queue.submit(std::iter::once(encoder.finish()));
            self.device.poll(wgpu::Maintain::Wait);
        }

        progress("normals", 0);
        self.normal_gen.generate(
            &self.device,
            &self.queue,
            &self.heightfield,
            &self.normal_map,
            config.world_size,
            config.height_scale,
            config.normal_strength,
        );
        progress("normals", 100);

        if config.island.enabled {
            self.regenerate_island_mask()?;
        }

        self.device.poll(wgpu::Maintain::Wait);

        if config.readback {
            progress("readback", 0);
            let heights = self
                .heightfield
                .read_back(&self.device, &self.queue)
                .inspect_err(|e| log::error!("heightfield readback failed: {e}"))?;
            self.height_sampler = Some(HeightSampler::new(
                heights,
                self.heightfield.resolution(),
                config.world_size,
                config.height_scale,
            ));
            progress("readback", 100);
        }

        self.generated = true;
        self.rebind_textures();
        log::info!("terrain generation finished in {:?}", started.elapsed());
        Ok(())
    }

    /// Deep-merge a partial config and re-run the full pipeline. Structural
    /// changes (resolution, world size, height bounds) rebuild the affected
    /// resources first.
    pub fn regenerate(
        &mut self,
        patch: &TerrainConfigPatch,
        progress: &mut dyn FnMut(&str, u32),
    ) -> Result<()> {
        if self.is_generating {
            log::warn!("regenerate called during generation; ignored");
            return Err(TerrainError::State("generation already in progress".into()));
        }

        let mut merged = self.config.clone();
        merged.apply(patch);
        // Reject before touching any stored state or GPU resource.
        merged.validate()?;

        let resolution_changed = merged.noise.resolution != self.config.noise.resolution;
        let bounds_changed = merged.world_size != self.config.world_size
            || merged.height_scale != self.config.height_scale;
        self.config = merged;

        if resolution_changed {
            let resolution = self.config.noise.resolution;
            log::info!("heightfield resolution changed to {resolution}; rebuilding textures");
            self.heightfield = Heightfield::new(&self.device, resolution, "Terrain Heightfield")?;
            self.erosion = ErosionSimulator::new(&self.device, resolution)?;
            self.normal_map = create_normal_texture(&self.device, resolution)
                .create_view(&wgpu::TextureViewDescriptor::default());
            self.island_mask = None;
            self.generated = false;
            self.rebind_textures();
        }
        if bounds_changed {
            self.quadtree = Quadtree::new(Self::quadtree_config(&self.config));
        }

        self.generate(progress)
    }

    /// Regenerate heightmap and normals only, skipping erosion and readback.
    /// Cheap enough for live parameter scrubbing.
    pub fn regenerate_heightmap_only(&mut self, noise: &NoiseConfig) -> Result<()> {
        if self.is_generating {
            log::warn!("regenerate_heightmap_only called during generation; ignored");
            return Err(TerrainError::State("generation already in progress".into()));
        }
        noise.validate()?;
        if noise.resolution != self.config.noise.resolution {
            return Err(TerrainError::Config(
                "live heightmap updates cannot change the resolution".into(),
            ));
        }
        self.config.noise = noise.clone();

        self.is_generating = true;
        let result: Result<()> = (|| {
            self.heightmap_gen.generate(
                &self.device,
                &self.queue,
                &self.heightfield,
                &self.mipmaps,
                noise,
            )?;
            self.device.poll(wgpu::Maintain::Wait);
            self.normal_gen.generate(
                &self.device,
                &self.queue,
                &self.heightfield,
                &self.normal_map,
                self.config.world_size,
                self.config.height_scale,
                self.config.normal_strength,
            );
            Ok(())
        })();
        self.is_generating = false;

        if result.is_ok() && !self.generated {
            self.generated = true;
            self.rebind_textures();
        }
        result
    }

    // ── Live parameter setters: uniforms only, effect next frame ─────────

    pub fn set_material(&mut self, material: MaterialConfig) {
        self.config.material = material;
    }

    pub fn set_detail_config(&mut self, detail: DetailConfig) {
        self.config.detail = detail;
    }

    pub fn set_island_enabled(&mut self, enabled: bool) {
        self.config.island.enabled = enabled;
    }

    pub fn set_sea_floor_depth(&mut self, depth: f32) {
        self.config.island.sea_floor_depth = depth;
    }

    pub fn set_island_config(&mut self, island: IslandConfig) {
        self.config.island = island;
    }

    /// Regenerate the island mask texture from the current island config.
    /// Does not touch the heightfield.
    pub fn regenerate_island_mask(&mut self) -> Result<()> {
        let resolution = self.heightfield.resolution();
        if self.island_mask.is_none() {
            self.island_mask = Some(
                create_island_texture(&self.device, resolution)
                    .create_view(&wgpu::TextureViewDescriptor::default()),
            );
        }
        let view = self.island_mask.as_ref().unwrap();
        self.island_gen
            .generate(&self.device, &self.queue, view, resolution, &self.config.island);
        self.rebind_textures();
        Ok(())
    }

    /// Bilinear world-space height from the CPU readback. Returns 0 until a
    /// generation with readback enabled has completed.
    pub fn sample_height_at(&self, x: f32, z: f32) -> f32 {
        match &self.height_sampler {
            Some(sampler) => sampler.sample(x, z),
            None => 0.0,
        }
    }

    /// Raw readback heights (normalized) and their resolution, if a
    /// generation with readback enabled has completed. Used by hosts for
    /// exports and debugging overlays.
    pub fn height_data(&self) -> Option<(&[f32], u32)> {
        self.height_sampler
            .as_ref()
            .map(|s| (s.heights(), s.resolution()))
    }

    /// Select patches and draw the terrain into the host's render pass.
    /// Rendering before a successful `generate` is a logged no-op.
    pub fn render(&mut self, pass: &mut wgpu::RenderPass, params: &RenderParams) {
        if !self.generated {
            log::debug!("render skipped: no terrain generated yet");
            return;
        }

        let select_params = SelectParams {
            lod_distance_multiplier: self.config.lod_distance_multiplier,
            morph_region: self.config.morph_region,
        };
        let selection = self.quadtree.select(
            params.camera_pos,
            params.view_proj * params.model,
            select_params,
        );
        let stats = SelectionStats {
            selected: selection.patches.len() as u32,
            considered: selection.considered,
            culled: selection.culled,
            truncated: 0,
        };

        let count = self.patch_renderer.update_instances(
            &self.queue,
            self.quadtree.last_selection(),
            self.config.max_lod_levels,
        );
        self.stats = SelectionStats {
            truncated: self.patch_renderer.truncated(),
            ..stats
        };
        if count == 0 {
            return;
        }

        let frame = FrameParams {
            view_proj: params.view_proj,
            model: params.model,
            camera_pos: params.camera_pos,
            light: params.light,
            cascades: params.cascades,
            use_scene_ambient: params.use_scene_ambient,
            island_enabled: self.config.island.enabled && self.island_mask.is_some(),
            sea_floor_depth: self.config.island.sea_floor_depth,
            debug_lod: params.debug_lod,
        };
        self.patch_renderer.write_uniforms(
            &self.queue,
            &frame,
            &self.config.material,
            &self.config.detail,
            self.config.world_size,
            self.config.height_scale,
            self.config.skirt_depth,
        );
        self.patch_renderer.draw(pass, params.wireframe);
    }

    /// Write every cascade's slot uniform and instance set. Frustum culling
    /// uses the cascade's light matrix (off-screen casters included), while
    /// LOD distance uses the camera position so shadow geometry matches the
    /// main pass exactly.
    pub fn write_shadow_uniforms(
        &mut self,
        slots: &[(Mat4, Vec3)],
        camera_pos: Vec3,
    ) -> Result<()> {
        if !self.generated {
            return Ok(());
        }
        if slots.len() > SHADOW_SLOT_COUNT as usize {
            return Err(TerrainError::Config(format!(
                "{} shadow slots requested, at most {SHADOW_SLOT_COUNT} supported",
                slots.len()
            )));
        }
        let select_params = SelectParams {
            lod_distance_multiplier: self.config.lod_distance_multiplier,
            morph_region: self.config.morph_region,
        };
        for (slot, (light_vp, light_pos)) in slots.iter().enumerate() {
            let slot = slot as u32;
            self.shadow_pass.write_slot_uniform(
                &self.queue,
                slot,
                *light_vp,
                *light_pos,
                self.config.world_size,
                self.config.height_scale,
                self.config.grid_size,
                self.config.skirt_depth,
            )?;
            self.quadtree.select(camera_pos, *light_vp, select_params);
            self.shadow_pass.update_slot_instances(
                &self.queue,
                slot,
                self.quadtree.last_selection(),
                self.config.grid_size,
                self.config.max_lod_levels,
            )?;
        }
        Ok(())
    }

    /// Depth-only draw of one cascade into the host's shadow pass.
    pub fn render_shadow(&self, pass: &mut wgpu::RenderPass, slot: u32) {
        if !self.generated {
            return;
        }
        self.shadow_pass
            .render(pass, self.patch_renderer.grid(), slot);
    }
}
