//! Vertex and instance layouts for the patch pipelines.

use bytemuck::{Pod, Zeroable};

/// One vertex of the shared patch grid.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GridVertex {
    /// Grid-local XZ in [-0.5, 0.5].
    pub position: [f32; 2],
    /// Texture coordinate in [0, 1].
    pub uv: [f32; 2],
    /// 1.0 on skirt vertices, 0.0 on the interior.
    pub skirt: f32,
}

impl GridVertex {
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GridVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32,
                },
            ],
        }
    }
}

/// Per-patch instance data, five packed floats.
///
/// `inverse_lod_index` is `max_lod_levels - 1 - lod_level`, so leaves map to
/// 0 and therefore to the highest-detail heightmap mip.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PatchInstance {
    pub center: [f32; 2],
    pub world_units_per_vertex: f32,
    pub morph_factor: f32,
    pub inverse_lod_index: f32,
}

impl PatchInstance {
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<PatchInstance>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                // center.xy, units per vertex, morph factor
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // inverse LOD index
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_record_is_five_floats() {
        assert_eq!(std::mem::size_of::<PatchInstance>(), 20);
    }

    #[test]
    fn grid_vertex_stride_matches_attributes() {
        assert_eq!(std::mem::size_of::<GridVertex>(), 20);
        let layout = GridVertex::layout();
        assert_eq!(layout.array_stride, 20);
        assert_eq!(layout.attributes.len(), 3);
    }
}
