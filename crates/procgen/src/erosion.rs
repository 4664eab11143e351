//! Hydraulic and thermal erosion on ping-pong heightfield textures.
//!
//! The simulator owns two single-mip copies of the heightfield plus one
//! scatter buffer. `load_from` copies the canonical heightfield in,
//! iterations ping-pong between the two sides, and `resolve_into` copies the
//! current side back out. Dropping iterations only yields smoother terrain,
//! so nothing here surfaces a runtime error once resources exist.

use bytemuck::{Pod, Zeroable};
use engine_core::{ErosionConfig, Result, TerrainError};

use crate::Heightfield;

/// Reference resolution the erosion rates are tuned against.
const BASE_RESOLUTION: f32 = 1024.0;

/// Must match `HydraulicParams` in `shaders/erosion_hydraulic.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct HydraulicParams {
    resolution: u32,
    droplet_count: u32,
    max_lifetime: u32,
    seed: u32,
    inertia: f32,
    gravity: f32,
    sediment_capacity: f32,
    min_capacity: f32,
    min_slope: f32,
    deposition_rate: f32,
    erosion_rate: f32,
    evaporation_rate: f32,
    brush_radius: i32,
    height_scale_factor: f32,
    _pad0: f32,
    _pad1: f32,
}

/// Must match `ThermalParams` in `shaders/erosion_thermal.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ThermalParams {
    resolution: u32,
    talus_angle: f32,
    rate: f32,
    _pad: f32,
}

pub struct ErosionSimulator {
    resolution: u32,
    textures: [wgpu::Texture; 2],
    views: [wgpu::TextureView; 2],
    scatter: wgpu::Buffer,
    hydraulic_params: wgpu::Buffer,
    thermal_params: wgpu::Buffer,
    simulate_pipeline: wgpu::ComputePipeline,
    finalize_pipeline: wgpu::ComputePipeline,
    thermal_pipeline: wgpu::ComputePipeline,
    hydraulic_layout: wgpu::BindGroupLayout,
    thermal_layout: wgpu::BindGroupLayout,
    /// Side holding the most recent result.
    current: usize,
    /// Total iterations run since `load_from`; advances the droplet seed so
    /// repeated swarms stay uncorrelated.
    iterations_run: u32,
}

impl ErosionSimulator {
    pub fn new(device: &wgpu::Device, resolution: u32) -> Result<Self> {
        if !resolution.is_power_of_two() {
            return Err(TerrainError::Config(format!(
                "erosion resolution must be a power of two, got {resolution}"
            )));
        }

        let make_side = |label: &str| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: resolution,
                    height: resolution,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: Heightfield::FORMAT,
                usage: wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        };
        let textures = [make_side("Erosion Side A"), make_side("Erosion Side B")];
        let views = [
            textures[0].create_view(&wgpu::TextureViewDescriptor::default()),
            textures[1].create_view(&wgpu::TextureViewDescriptor::default()),
        ];

        let scatter = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Erosion Scatter Buffer"),
            size: (resolution as u64 * resolution as u64) * 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let hydraulic_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Hydraulic Erosion Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("shaders/erosion_hydraulic.wgsl").into(),
            ),
        });
        let thermal_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Thermal Erosion Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/erosion_thermal.wgsl").into()),
        });

        let hydraulic_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Hydraulic Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: Heightfield::FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
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

        let thermal_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Thermal Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: Heightfield::FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
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

        let hydraulic_pl = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Hydraulic Pipeline Layout"),
            bind_group_layouts: &[&hydraulic_layout],
            push_constant_ranges: &[],
        });
        let thermal_pl = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Thermal Pipeline Layout"),
            bind_group_layouts: &[&thermal_layout],
            push_constant_ranges: &[],
        });

        let simulate_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Droplet Simulate Pipeline"),
            layout: Some(&hydraulic_pl),
            module: &hydraulic_shader,
            entry_point: Some("simulate"),
            compilation_options: Default::default(),
            cache: None,
        });
        let finalize_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Droplet Finalize Pipeline"),
            layout: Some(&hydraulic_pl),
            module: &hydraulic_shader,
            entry_point: Some("finalize"),
            compilation_options: Default::default(),
            cache: None,
        });
        let thermal_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Thermal Pipeline"),
            layout: Some(&thermal_pl),
            module: &thermal_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let hydraulic_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Hydraulic Params"),
            size: std::mem::size_of::<HydraulicParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let thermal_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Thermal Params"),
            size: std::mem::size_of::<ThermalParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            resolution,
            textures,
            views,
            scatter,
            hydraulic_params,
            thermal_params,
            simulate_pipeline,
            finalize_pipeline,
            thermal_pipeline,
            hydraulic_layout,
            thermal_layout,
            current: 0,
            iterations_run: 0,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// View of the side holding the latest result.
    pub fn output_view(&self) -> &wgpu::TextureView {
        &self.views[self.current]
    }

    /// Copy heightfield mip 0 into side A and reset the iteration counter.
    pub fn load_from(&mut self, encoder: &mut wgpu::CommandEncoder, heightfield: &Heightfield) {
        debug_assert_eq!(heightfield.resolution(), self.resolution);
        encoder.copy_texture_to_texture(
            heightfield.texture().as_image_copy(),
            self.textures[0].as_image_copy(),
            wgpu::Extent3d {
                width: self.resolution,
                height: self.resolution,
                depth_or_array_layers: 1,
            },
        );
        self.current = 0;
        self.iterations_run = 0;
    }

    /// Copy the current side back into heightfield mip 0. The mip chain and
    /// normal map are stale afterwards; the orchestrator refreshes both.
    pub fn resolve_into(&self, encoder: &mut wgpu::CommandEncoder, heightfield: &Heightfield) {
        encoder.copy_texture_to_texture(
            self.textures[self.current].as_image_copy(),
            heightfield.texture().as_image_copy(),
            wgpu::Extent3d {
                width: self.resolution,
                height: self.resolution,
                depth_or_array_layers: 1,
            },
        );
    }

    /// One hydraulic iteration: zero the scatter buffer, walk one droplet
    /// swarm, fold the accumulated deltas into the other side. Submits one
    /// command buffer and swaps sides.
    pub fn hydraulic_iteration(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        config: &ErosionConfig,
        base_seed: u32,
    ) {
        // Rates are tuned at 1024; rescale so coarser or finer fields erode
        // comparably per iteration.
        let res_factor = self.resolution as f32 / BASE_RESOLUTION;
        let droplet_count =
            ((config.droplets_per_iteration as f32) * res_factor * res_factor).max(1.0) as u32;
        let params = HydraulicParams {
            resolution: self.resolution,
            droplet_count,
            max_lifetime: ((config.max_droplet_lifetime as f32) * res_factor).max(1.0) as u32,
            seed: base_seed.wrapping_add(self.iterations_run.wrapping_mul(0x9e37_79b9)),
            inertia: config.inertia,
            gravity: config.gravity,
            sediment_capacity: config.sediment_capacity,
            min_capacity: config.min_capacity,
            min_slope: config.min_slope,
            deposition_rate: config.deposition_rate * res_factor,
            erosion_rate: config.erosion_rate * res_factor,
            evaporation_rate: config.evaporation_rate,
            brush_radius: config.brush_radius as i32,
            height_scale_factor: config.height_scale_factor,
            _pad0: 0.0,
            _pad1: 0.0,
        };
        queue.write_buffer(&self.hydraulic_params, 0, bytemuck::bytes_of(&params));

        let src = self.current;
        let dst = 1 - src;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Hydraulic Bind Group"),
            layout: &self.hydraulic_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.views[src]),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.views[dst]),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.scatter.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.hydraulic_params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Hydraulic Encoder"),
        });
        encoder.clear_buffer(&self.scatter, 0, None);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Droplet Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.simulate_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(droplet_count.div_ceil(256), 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Finalize Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.finalize_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let groups = self.resolution.div_ceil(8);
            pass.dispatch_workgroups(groups, groups, 1);
        }
        queue.submit(std::iter::once(encoder.finish()));

        self.current = dst;
        self.iterations_run += 1;
    }

    /// One thermal iteration: talus transfer from the current side into the
    /// other, then swap.
    pub fn thermal_iteration(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        config: &ErosionConfig,
    ) {
        let params = ThermalParams {
            resolution: self.resolution,
            talus_angle: config.talus_angle,
            rate: config.thermal_rate,
            _pad: 0.0,
        };
        queue.write_buffer(&self.thermal_params, 0, bytemuck::bytes_of(&params));

        let src = self.current;
        let dst = 1 - src;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Thermal Bind Group"),
            layout: &self.thermal_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.views[src]),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.views[dst]),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.thermal_params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Thermal Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Thermal Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.thermal_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let groups = self.resolution.div_ceil(8);
            pass.dispatch_workgroups(groups, groups, 1);
        }
        queue.submit(std::iter::once(encoder.finish()));

        self.current = dst;
        self.iterations_run += 1;
    }
}
