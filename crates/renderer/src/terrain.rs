//! Instanced terrain patch renderer.
//!
//! Holds the solid and wireframe pipelines, the shared grid, the instance
//! buffer rewritten from the selection every frame and one uniform block
//! mirroring `TerrainUniform` in `shaders/terrain.wgsl`.

use engine_core::{DetailConfig, MaterialConfig, Result, TerrainError, UniformBuilder};
use glam::{Mat4, Vec3};

use crate::grid::{GridMesh, GridMeshData};
use crate::pipeline::{
    create_terrain_bind_group_layout, create_terrain_pipeline, create_terrain_wireframe_pipeline,
};
use crate::quadtree::Selection;
use crate::texture::Texture;
use crate::vertex::PatchInstance;

/// Byte size of the terrain uniform block (struct size rounded up to a
/// 256-byte boundary).
pub const TERRAIN_UNIFORM_SIZE: u64 = 768;

/// Capability mask bits for optional render features supplied by the host.
pub const CAP_AMBIENT: u32 = 1;
pub const CAP_SHADOWS: u32 = 2;

/// Directional light plus the ambient term from the scene environment.
#[derive(Debug, Clone, Copy)]
pub struct LightParams {
    /// Direction from the surface toward the light, normalized.
    pub direction: Vec3,
    pub color: [f32; 3],
    pub ambient: [f32; 3],
}

impl Default for LightParams {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.4, 0.8, 0.3).normalize(),
            color: [1.0, 0.97, 0.9],
            ambient: [0.25, 0.28, 0.34],
        }
    }
}

/// Cascade matrices and split distances for shadow sampling in the main pass.
#[derive(Debug, Clone, Copy)]
pub struct CascadeParams {
    pub view_proj: [Mat4; 4],
    /// View-distance upper bound of each cascade.
    pub splits: [f32; 4],
    pub count: u32,
}

/// Everything the host supplies per frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameParams {
    pub view_proj: Mat4,
    pub model: Mat4,
    pub camera_pos: Vec3,
    pub light: LightParams,
    pub cascades: Option<CascadeParams>,
    /// Capability mask bit: use the scene-environment ambient term.
    pub use_scene_ambient: bool,
    pub island_enabled: bool,
    pub sea_floor_depth: f32,
    /// Color patches by LOD and overlay their borders.
    pub debug_lod: bool,
}

/// Pack a selection into instance records, clipping at `max_instances` with
/// order preserved. Returns the records and how many patches were dropped.
pub fn pack_instances(
    selection: &Selection,
    grid_size: u32,
    max_lod_levels: u32,
    max_instances: u32,
) -> (Vec<PatchInstance>, u32) {
    let cells = (grid_size - 1) as f32;
    let kept = selection.patches.len().min(max_instances as usize);
    let truncated = (selection.patches.len() - kept) as u32;
    let instances = selection.patches[..kept]
        .iter()
        .map(|patch| PatchInstance {
            center: [patch.center.x, patch.center.y],
            world_units_per_vertex: patch.size / cells,
            morph_factor: patch.morph_factor,
            inverse_lod_index: (max_lod_levels - 1 - patch.lod_level) as f32,
        })
        .collect();
    (instances, truncated)
}

pub struct TerrainRenderer {
    solid_pipeline: wgpu::RenderPipeline,
    wireframe_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
    uniform_buffer: wgpu::Buffer,
    instance_buffer: wgpu::Buffer,
    linear_sampler: wgpu::Sampler,
    shadow_sampler: wgpu::Sampler,
    grid: GridMesh,
    max_instances: u32,
    instance_count: u32,
    truncated: u32,
}

impl TerrainRenderer {
    pub fn new(device: &wgpu::Device, grid_size: u32, max_instances: u32) -> Result<Self> {
        if grid_size < 3 || grid_size % 2 == 0 {
            return Err(TerrainError::Config(format!(
                "grid size must be odd and at least 3, got {grid_size}"
            )));
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Terrain Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/terrain.wgsl").into()),
        });
        let bind_group_layout = create_terrain_bind_group_layout(device);
        let solid_pipeline = create_terrain_pipeline(device, &bind_group_layout, &shader);
        let wireframe_pipeline =
            create_terrain_wireframe_pipeline(device, &bind_group_layout, &shader);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Uniform Buffer"),
            size: TERRAIN_UNIFORM_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Patch Instance Buffer"),
            size: (max_instances as u64) * std::mem::size_of::<PatchInstance>() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let grid = GridMesh::new(device, &GridMeshData::new(grid_size));

        Ok(Self {
            solid_pipeline,
            wireframe_pipeline,
            bind_group_layout,
            bind_group: None,
            uniform_buffer,
            instance_buffer,
            linear_sampler: Texture::linear_sampler(device),
            shadow_sampler: Texture::shadow_sampler(device),
            grid,
            max_instances,
            instance_count: 0,
            truncated: 0,
        })
    }

    pub fn grid(&self) -> &GridMesh {
        &self.grid
    }

    /// Rebuild the bind group against the current texture set. Called after
    /// generation replaces a texture and once at startup with the fallbacks.
    pub fn bind_textures(
        &mut self,
        device: &wgpu::Device,
        heightmap: &wgpu::TextureView,
        normal_map: &wgpu::TextureView,
        island_mask: &wgpu::TextureView,
        shadow_maps: &wgpu::TextureView,
    ) {
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(heightmap),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(normal_map),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(island_mask),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(shadow_maps),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::Sampler(&self.shadow_sampler),
                },
            ],
        }));
    }

    /// Upload the selection as instance records. Oversized selections are
    /// clipped silently apart from the exported counter.
    pub fn update_instances(
        &mut self,
        queue: &wgpu::Queue,
        selection: &Selection,
        max_lod_levels: u32,
    ) -> u32 {
        let (instances, truncated) = pack_instances(
            selection,
            self.grid.grid_size,
            max_lod_levels,
            self.max_instances,
        );
        if truncated > 0 {
            log::debug!("patch selection truncated: {truncated} dropped");
        }
        if !instances.is_empty() {
            queue.write_buffer(&self.instance_buffer, 0, bytemuck::cast_slice(&instances));
        }
        self.instance_count = instances.len() as u32;
        self.truncated = truncated;
        self.instance_count
    }

    /// Patches dropped by the last `update_instances` call.
    pub fn truncated(&self) -> u32 {
        self.truncated
    }

    /// Write the frame uniforms. The field order mirrors `TerrainUniform` in
    /// `shaders/terrain.wgsl` verbatim.
    pub fn write_uniforms(
        &self,
        queue: &wgpu::Queue,
        frame: &FrameParams,
        material: &MaterialConfig,
        detail: &DetailConfig,
        terrain_size: f32,
        height_scale: f32,
        skirt_depth: f32,
    ) {
        let mut flags = 0u32;
        if frame.use_scene_ambient {
            flags |= CAP_AMBIENT;
        }
        if frame.cascades.is_some() {
            flags |= CAP_SHADOWS;
        }
        let cascades = frame.cascades.unwrap_or(CascadeParams {
            view_proj: [Mat4::IDENTITY; 4],
            splits: [0.0; 4],
            count: 0,
        });

        let mut b = UniformBuilder::new();
        b.mat4(frame.view_proj.to_cols_array())
            .mat4(frame.model.to_cols_array());
        for vp in cascades.view_proj {
            b.mat4(vp.to_cols_array());
        }
        b.vec4(cascades.splits)
            .vec3(frame.camera_pos.to_array())
            .f32(terrain_size)
            .vec3(frame.light.direction.to_array())
            .f32(height_scale)
            .vec3(frame.light.color)
            .f32(self.grid.grid_size as f32)
            .vec3(frame.light.ambient)
            .f32(skirt_depth)
            .vec3(material.grass_color)
            .f32(material.snow_height)
            .vec3(material.rock_color)
            .f32(material.beach_height)
            .vec3(material.snow_color)
            .f32(material.rock_slope)
            .vec3(material.dirt_color)
            .f32(material.blend_sharpness)
            .vec3(material.beach_color)
            .f32(detail.amplitude)
            .f32(detail.scale)
            .f32(frame.sea_floor_depth)
            .bool(frame.island_enabled)
            .bool(frame.debug_lod)
            .u32(flags)
            .u32(cascades.count)
            .pad_to(TERRAIN_UNIFORM_SIZE as usize);
        queue.write_buffer(&self.uniform_buffer, 0, b.as_bytes());
    }

    /// Draw the current instance set into the host's render pass. A missing
    /// bind group or an empty selection is a no-op.
    pub fn draw(&self, pass: &mut wgpu::RenderPass, wireframe: bool) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };
        if self.instance_count == 0 {
            return;
        }
        if wireframe {
            pass.set_pipeline(&self.wireframe_pipeline);
            pass.set_index_buffer(
                self.grid.line_index_buffer.slice(..),
                wgpu::IndexFormat::Uint32,
            );
        } else {
            pass.set_pipeline(&self.solid_pipeline);
            pass.set_index_buffer(self.grid.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        }
        pass.set_bind_group(0, bind_group, &[]);
        pass.set_vertex_buffer(0, self.grid.vertex_buffer.slice(..));
        pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
        let index_count = if wireframe {
            self.grid.line_index_count
        } else {
            self.grid.index_count
        };
        pass.draw_indexed(0..index_count, 0, 0..self.instance_count);
    }

    /// Hot-reload the terrain shader. On compile or validation failure the
    /// previous pipelines stay live and the error is returned to the caller.
    pub fn rebuild_pipelines(&mut self, device: &wgpu::Device, source: &str) -> Result<()> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Terrain Shader (reload)"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let solid = create_terrain_pipeline(device, &self.bind_group_layout, &shader);
        let wireframe = create_terrain_wireframe_pipeline(device, &self.bind_group_layout, &shader);
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            log::warn!("terrain shader reload rejected: {error}");
            return Err(TerrainError::ShaderCompile(error.to_string()));
        }
        self.solid_pipeline = solid;
        self.wireframe_pipeline = wireframe;
        log::info!("terrain pipelines rebuilt from new shader source");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quadtree::{SelectedPatch, Selection};
    use glam::Vec2;

    fn selection_of(count: usize) -> Selection {
        Selection {
            patches: (0..count)
                .map(|i| SelectedPatch {
                    node: i as u32,
                    center: Vec2::new(i as f32, 0.0),
                    size: 64.0,
                    lod_level: 3,
                    morph_factor: 0.5,
                })
                .collect(),
            considered: count as u32,
            culled: 0,
        }
    }

    #[test]
    fn instances_map_lod_to_mip() {
        let selection = selection_of(1);
        let (instances, truncated) = pack_instances(&selection, 129, 7, 512);
        assert_eq!(truncated, 0);
        // lod 3 of 7 levels -> inverse index 3
        assert_eq!(instances[0].inverse_lod_index, 3.0);
        assert_eq!(instances[0].world_units_per_vertex, 64.0 / 128.0);
    }

    #[test]
    fn oversized_selection_is_clipped_in_order() {
        let selection = selection_of(600);
        let (instances, truncated) = pack_instances(&selection, 129, 7, 512);
        assert_eq!(instances.len(), 512);
        assert_eq!(truncated, 88);
        // Order preserved: first patches survive
        assert_eq!(instances[0].center[0], 0.0);
        assert_eq!(instances[511].center[0], 511.0);
    }

    #[test]
    fn terrain_uniform_layout_matches_shader_struct() {
        let frame = FrameParams {
            view_proj: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
            camera_pos: Vec3::ZERO,
            light: LightParams::default(),
            cascades: None,
            use_scene_ambient: true,
            island_enabled: false,
            sea_floor_depth: -0.3,
            debug_lod: false,
        };
        let material = MaterialConfig::default();
        let detail = DetailConfig::default();

        // Re-run the exact builder sequence used by write_uniforms
        let mut b = UniformBuilder::new();
        b.mat4(frame.view_proj.to_cols_array())
            .mat4(frame.model.to_cols_array());
        for _ in 0..4 {
            b.mat4(Mat4::IDENTITY.to_cols_array());
        }
        b.vec4([0.0; 4])
            .vec3(frame.camera_pos.to_array())
            .f32(1024.0)
            .vec3(frame.light.direction.to_array())
            .f32(180.0)
            .vec3(frame.light.color)
            .f32(129.0)
            .vec3(frame.light.ambient)
            .f32(0.05)
            .vec3(material.grass_color)
            .f32(material.snow_height)
            .vec3(material.rock_color)
            .f32(material.beach_height)
            .vec3(material.snow_color)
            .f32(material.rock_slope)
            .vec3(material.dirt_color)
            .f32(material.blend_sharpness)
            .vec3(material.beach_color)
            .f32(detail.amplitude)
            .f32(detail.scale)
            .f32(frame.sea_floor_depth)
            .bool(frame.island_enabled)
            .bool(frame.debug_lod)
            .u32(0)
            .u32(0);
        // WGSL struct size before the trailing 256-byte padding
        assert_eq!(b.len(), 568);
        b.pad_to(TERRAIN_UNIFORM_SIZE as usize);
        assert_eq!(b.len() as u64, TERRAIN_UNIFORM_SIZE);
        assert_eq!(TERRAIN_UNIFORM_SIZE % 256, 0);
    }
}
