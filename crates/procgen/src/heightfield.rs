//! Heightfield texture set and CPU readback.
//!
//! The heightfield is a single-channel float texture with a full mip chain.
//! Values are normalized to roughly [-0.5, 0.5]; world height is the sample
//! times the configured height scale. Mip k is a box-filter downsample of
//! mip k-1, and the chain is refreshed after every accepted change to mip 0.

use engine_core::{Result, TerrainError};

/// Heightfield texture with one view per mip level plus a full-chain view.
pub struct Heightfield {
    texture: wgpu::Texture,
    resolution: u32,
    mip_count: u32,
    full_view: wgpu::TextureView,
    mip_views: Vec<wgpu::TextureView>,
}

impl Heightfield {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

    /// Create an all-zero heightfield of `resolution`^2 texels with a full
    /// mip chain (floor(log2 R) + 1 levels).
    pub fn new(device: &wgpu::Device, resolution: u32, label: &str) -> Result<Self> {
        if !resolution.is_power_of_two() {
            return Err(TerrainError::Config(format!(
                "heightfield resolution must be a power of two, got {resolution}"
            )));
        }
        let mip_count = 32 - resolution.leading_zeros();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let full_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mip_views = (0..mip_count)
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Heightfield Mip View"),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        Ok(Self {
            texture,
            resolution,
            mip_count,
            full_view,
            mip_views,
        })
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// View over the whole mip chain, for render-time sampling.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.full_view
    }

    /// Single-level view, for binding one mip as compute input or output.
    pub fn mip_view(&self, level: u32) -> &wgpu::TextureView {
        &self.mip_views[level as usize]
    }

    /// Dimensions of mip `level` (max(1, R >> level)).
    pub fn mip_size(&self, level: u32) -> u32 {
        (self.resolution >> level).max(1)
    }

    /// Upload CPU heights into mip 0. The rest of the chain is stale until
    /// the mipmap generator runs.
    pub fn write_mip0(&self, queue: &wgpu::Queue, heights: &[f32]) -> Result<()> {
        let expected = (self.resolution * self.resolution) as usize;
        if heights.len() != expected {
            return Err(TerrainError::Config(format!(
                "heightfield upload needs {expected} texels, got {}",
                heights.len()
            )));
        }
        queue.write_texture(
            self.texture.as_image_copy(),
            bytemuck::cast_slice(heights),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.resolution * 4),
                rows_per_image: Some(self.resolution),
            },
            wgpu::Extent3d {
                width: self.resolution,
                height: self.resolution,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Copy mip 0 to the CPU, blocking until the GPU catches up.
    pub fn read_back(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<f32>> {
        self.read_back_mip(device, queue, 0)
    }

    /// Copy one mip level to the CPU. Row pitch is padded to the 256-byte
    /// copy alignment and stripped again after mapping.
    pub fn read_back_mip(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        level: u32,
    ) -> Result<Vec<f32>> {
        if level >= self.mip_count {
            return Err(TerrainError::Config(format!(
                "mip level {level} out of range 0..{}",
                self.mip_count
            )));
        }
        let size = self.mip_size(level);
        let row_bytes = size * 4;
        let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Heightfield Readback"),
            size: (padded_row * size) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Heightfield Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(size),
                },
            },
            wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| TerrainError::GpuExecution("readback channel closed".into()))?
            .map_err(|e| TerrainError::GpuExecution(format!("heightfield map failed: {e:?}")))?;

        let data = slice.get_mapped_range();
        let mut heights = Vec::with_capacity((size * size) as usize);
        for row in 0..size {
            let start = (row * padded_row) as usize;
            let row_slice = &data[start..start + row_bytes as usize];
            heights.extend_from_slice(bytemuck::cast_slice(row_slice));
        }
        drop(data);
        staging.unmap();
        Ok(heights)
    }
}

/// CPU copy of the heightfield for collision-style height queries.
#[derive(Debug, Clone)]
pub struct HeightSampler {
    data: Vec<f32>,
    resolution: u32,
    world_size: f32,
    height_scale: f32,
}

impl HeightSampler {
    pub fn new(data: Vec<f32>, resolution: u32, world_size: f32, height_scale: f32) -> Self {
        debug_assert_eq!(data.len(), (resolution * resolution) as usize);
        Self {
            data,
            resolution,
            world_size,
            height_scale,
        }
    }

    /// Bilinearly interpolated world-space height at (x, z), clamped to the
    /// terrain bounds. Texel centers sit on integer grid coordinates, the
    /// same mapping the vertex shader uses.
    pub fn sample(&self, x: f32, z: f32) -> f32 {
        let res = self.resolution as usize;
        let max_texel = (self.resolution - 1) as f32;
        let gx = ((x + self.world_size * 0.5) / self.world_size * max_texel).clamp(0.0, max_texel);
        let gz = ((z + self.world_size * 0.5) / self.world_size * max_texel).clamp(0.0, max_texel);

        let x0 = (gx.floor() as usize).min(res - 2);
        let z0 = (gz.floor() as usize).min(res - 2);
        let fx = (gx - x0 as f32).clamp(0.0, 1.0);
        let fz = (gz - z0 as f32).clamp(0.0, 1.0);

        let h00 = self.data[z0 * res + x0];
        let h10 = self.data[z0 * res + x0 + 1];
        let h01 = self.data[(z0 + 1) * res + x0];
        let h11 = self.data[(z0 + 1) * res + x0 + 1];

        let h0 = h00 + (h10 - h00) * fx;
        let h1 = h01 + (h11 - h01) * fx;
        (h0 + (h1 - h0) * fz) * self.height_scale
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn heights(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_sampler(res: u32) -> HeightSampler {
        // height = texel x index, so interpolation is easy to predict
        let data: Vec<f32> = (0..res * res).map(|i| (i % res) as f32).collect();
        HeightSampler::new(data, res, 64.0, 1.0)
    }

    /// At integer texel centers the sampler returns the source value exactly.
    #[test]
    fn exact_at_texel_centers() {
        let s = ramp_sampler(8);
        for i in 0..8u32 {
            let world_x = (i as f32 / 7.0) * 64.0 - 32.0;
            let h = s.sample(world_x, 0.0);
            assert!((h - i as f32).abs() < 1e-5, "texel {i}: {h}");
        }
    }

    #[test]
    fn interpolates_between_texels() {
        let s = ramp_sampler(8);
        // halfway between texel 3 and 4
        let world_x = (3.5 / 7.0) * 64.0 - 32.0;
        let h = s.sample(world_x, 0.0);
        assert!((h - 3.5).abs() < 1e-4, "{h}");
    }

    #[test]
    fn clamps_outside_bounds() {
        let s = ramp_sampler(8);
        assert_eq!(s.sample(-1000.0, 0.0), 0.0);
        assert!((s.sample(1000.0, 0.0) - 7.0).abs() < 1e-5);
    }

    #[test]
    fn applies_height_scale() {
        let data = vec![0.5; 16];
        let s = HeightSampler::new(data, 4, 10.0, 200.0);
        assert!((s.sample(0.0, 0.0) - 100.0).abs() < 1e-4);
    }
}
