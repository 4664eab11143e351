//! Depth-only shadow pass with dynamic uniform slots for CSM.
//!
//! All cascades share one 1280-byte uniform buffer holding five 256-byte
//! aligned slots (4 cascades plus one legacy single-map slot). Each
//! `render` call binds the shared bind group with the slot's dynamic offset.

use engine_core::{Result, TerrainError, UniformBuilder};
use glam::{Mat4, Vec3};

use crate::grid::GridMesh;
use crate::pipeline::{create_shadow_bind_group_layout, create_shadow_pipeline};
use crate::quadtree::Selection;
use crate::terrain::pack_instances;
use crate::vertex::PatchInstance;

/// Dynamic-offset stride; the minimum uniform buffer offset alignment.
pub const SHADOW_SLOT_SIZE: u32 = 256;
/// Four cascades plus the legacy single-map slot.
pub const SHADOW_SLOT_COUNT: u32 = 5;
/// Cascades usable by the main pass.
pub const SHADOW_CASCADE_COUNT: u32 = 4;

pub struct ShadowPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
    uniform_buffer: wgpu::Buffer,
    /// One region of `max_instances` records per slot.
    instance_buffer: wgpu::Buffer,
    instance_counts: [u32; SHADOW_SLOT_COUNT as usize],
    max_instances: u32,
}

impl ShadowPass {
    pub fn new(device: &wgpu::Device, max_instances: u32) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Shadow Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/shadow.wgsl").into()),
        });
        let bind_group_layout = create_shadow_bind_group_layout(device);
        let pipeline = create_shadow_pipeline(device, &bind_group_layout, &shader);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Shadow Slot Uniforms"),
            size: (SHADOW_SLOT_SIZE * SHADOW_SLOT_COUNT) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Shadow Instance Buffer"),
            size: (SHADOW_SLOT_COUNT as u64)
                * (max_instances as u64)
                * std::mem::size_of::<PatchInstance>() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            pipeline,
            bind_group_layout,
            bind_group: None,
            uniform_buffer,
            instance_buffer,
            instance_counts: [0; SHADOW_SLOT_COUNT as usize],
            max_instances,
        }
    }

    /// Rebuild the bind group against the current heightfield.
    pub fn bind_heightmap(&mut self, device: &wgpu::Device, heightmap: &wgpu::TextureView) {
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shadow Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.uniform_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(SHADOW_SLOT_SIZE as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(heightmap),
                },
            ],
        }));
    }

    /// Write one cascade's slot payload. Must be called (for every used
    /// slot) before the slot is rendered this frame.
    pub fn write_slot_uniform(
        &self,
        queue: &wgpu::Queue,
        slot: u32,
        light_vp: Mat4,
        light_pos: Vec3,
        terrain_size: f32,
        height_scale: f32,
        grid_size: u32,
        skirt_depth: f32,
    ) -> Result<()> {
        if slot >= SHADOW_SLOT_COUNT {
            return Err(TerrainError::Config(format!(
                "shadow slot {slot} out of range 0..{SHADOW_SLOT_COUNT}"
            )));
        }
        let mut b = UniformBuilder::new();
        b.mat4(light_vp.to_cols_array())
            .vec3(light_pos.to_array())
            .f32(terrain_size)
            .f32(height_scale)
            .f32(grid_size as f32)
            .f32(skirt_depth)
            .pad_to(SHADOW_SLOT_SIZE as usize);
        queue.write_buffer(
            &self.uniform_buffer,
            (slot * SHADOW_SLOT_SIZE) as u64,
            b.as_bytes(),
        );
        Ok(())
    }

    /// Upload a cascade's selection into its slot region.
    pub fn update_slot_instances(
        &mut self,
        queue: &wgpu::Queue,
        slot: u32,
        selection: &Selection,
        grid_size: u32,
        max_lod_levels: u32,
    ) -> Result<u32> {
        if slot >= SHADOW_SLOT_COUNT {
            return Err(TerrainError::Config(format!(
                "shadow slot {slot} out of range 0..{SHADOW_SLOT_COUNT}"
            )));
        }
        let (instances, _truncated) =
            pack_instances(selection, grid_size, max_lod_levels, self.max_instances);
        if !instances.is_empty() {
            let offset = (slot as u64)
                * (self.max_instances as u64)
                * std::mem::size_of::<PatchInstance>() as u64;
            queue.write_buffer(&self.instance_buffer, offset, bytemuck::cast_slice(&instances));
        }
        self.instance_counts[slot as usize] = instances.len() as u32;
        Ok(instances.len() as u32)
    }

    /// Render one cascade into the host's depth-only pass. A slot with an
    /// empty selection renders nothing.
    pub fn render(&self, pass: &mut wgpu::RenderPass, grid: &GridMesh, slot: u32) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };
        let count = self.instance_counts[slot as usize];
        if count == 0 {
            return;
        }
        let byte_offset = (slot as u64)
            * (self.max_instances as u64)
            * std::mem::size_of::<PatchInstance>() as u64;

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[slot * SHADOW_SLOT_SIZE]);
        pass.set_vertex_buffer(0, grid.vertex_buffer.slice(..));
        pass.set_vertex_buffer(1, self.instance_buffer.slice(byte_offset..));
        pass.set_index_buffer(grid.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..grid.index_count, 0, 0..count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every slot's dynamic offset is a multiple of the 256-byte minimum
    /// uniform alignment.
    #[test]
    fn slot_offsets_are_aligned() {
        for slot in 0..SHADOW_SLOT_COUNT {
            assert_eq!((slot * SHADOW_SLOT_SIZE) % 256, 0);
        }
        assert_eq!(SHADOW_SLOT_SIZE * SHADOW_SLOT_COUNT, 1280);
    }

    /// The slot payload fits the 256-byte slot with the documented layout:
    /// mat4 + vec3 + four scalars.
    #[test]
    fn slot_payload_layout() {
        let mut b = UniformBuilder::new();
        b.mat4(Mat4::IDENTITY.to_cols_array())
            .vec3([1.0, 2.0, 3.0])
            .f32(1024.0)
            .f32(180.0)
            .f32(129.0)
            .f32(0.05);
        assert_eq!(b.len(), 92);
        b.pad_to(SHADOW_SLOT_SIZE as usize);
        assert_eq!(b.len(), 256);
    }
}
