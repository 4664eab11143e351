//! FBM noise synthesis on the GPU.

use bytemuck::{Pod, Zeroable};
use engine_core::{NoiseConfig, Result};

use crate::{Heightfield, MipmapGenerator};

/// Must match `NoiseParams` in `shaders/noise.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct NoiseParams {
    offset: [f32; 2],
    scale: [f32; 2],
    warp_scale: [f32; 2],
    persistence: f32,
    lacunarity: f32,
    warp_strength: f32,
    ridge_weight: f32,
    octave_rotation: f32,
    resolution: u32,
    octaves: u32,
    warp_octaves: u32,
    rotate_octaves: u32,
    seed: u32,
}

/// Generates heightfield mip 0 from layered noise, then refreshes the mip
/// chain so the whole texture is coherent before anyone samples it.
pub struct HeightmapGenerator {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
}

impl HeightmapGenerator {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Noise Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/noise.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Noise Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: Heightfield::FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Noise Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Noise Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Noise Params"),
            size: std::mem::size_of::<NoiseParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            pipeline,
            bind_group_layout,
            params_buffer,
        }
    }

    /// Fill the heightfield from `config` and rebuild its mip chain in the
    /// same submission.
    pub fn generate(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        heightfield: &Heightfield,
        mipmaps: &MipmapGenerator,
        config: &NoiseConfig,
    ) -> Result<()> {
        config.validate()?;
        let resolution = heightfield.resolution();

        let params = NoiseParams {
            offset: config.offset,
            scale: config.scale,
            warp_scale: config.warp_scale,
            persistence: config.persistence,
            lacunarity: config.lacunarity,
            warp_strength: config.warp_strength,
            ridge_weight: config.ridge_weight,
            octave_rotation: config.octave_rotation_deg.to_radians(),
            resolution,
            octaves: config.octaves,
            warp_octaves: config.warp_octaves,
            rotate_octaves: config.rotate_octaves as u32,
            seed: config.seed,
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Noise Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(heightfield.mip_view(0)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Noise Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Noise Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let groups = resolution.div_ceil(8);
            pass.dispatch_workgroups(groups, groups, 1);
        }
        mipmaps.record(device, &mut encoder, heightfield);
        queue.submit(std::iter::once(encoder.finish()));

        log::debug!(
            "heightmap generated: {resolution}x{resolution}, {} octaves, seed {}",
            config.octaves,
            config.seed
        );
        Ok(())
    }
}
