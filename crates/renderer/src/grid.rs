//! The shared patch grid.
//!
//! One G x G grid (G odd) is built once and drawn for every selected node
//! with per-instance offset/scale. Local XZ spans [-0.5, 0.5] and UV spans
//! [0, 1]. Four skirt strips duplicate the boundary vertices with the skirt
//! flag set; the vertex shader extrudes them downward to hide cracks at LOD
//! seams.

use glam::Vec2;
use wgpu::util::DeviceExt;

use crate::vertex::GridVertex;

/// CPU-side grid geometry. Kept separate from the GPU buffers so the
/// construction logic is testable without a device.
#[derive(Debug)]
pub struct GridMeshData {
    pub grid_size: u32,
    pub vertices: Vec<GridVertex>,
    pub indices: Vec<u32>,
    /// Line-list indices over the interior lattice, for wireframe mode.
    pub line_indices: Vec<u32>,
}

impl GridMeshData {
    /// Build the grid. `grid_size` must be odd so that morph snap positions
    /// (every other vertex) land exactly on the parent lattice.
    pub fn new(grid_size: u32) -> Self {
        assert!(grid_size >= 3 && grid_size % 2 == 1, "grid size must be odd");
        let g = grid_size as usize;
        let step = 1.0 / (grid_size - 1) as f32;

        let mut vertices = Vec::with_capacity(g * g + 4 * g);
        for row in 0..g {
            for col in 0..g {
                let u = col as f32 * step;
                let v = row as f32 * step;
                vertices.push(GridVertex {
                    position: [u - 0.5, v - 0.5],
                    uv: [u, v],
                    skirt: 0.0,
                });
            }
        }

        let mut indices = Vec::with_capacity(6 * (g - 1) * (g - 1));
        for row in 0..g - 1 {
            for col in 0..g - 1 {
                let top_left = (row * g + col) as u32;
                let top_right = top_left + 1;
                let bottom_left = top_left + g as u32;
                let bottom_right = bottom_left + 1;
                indices.extend([
                    top_left,
                    bottom_left,
                    top_right,
                    top_right,
                    bottom_left,
                    bottom_right,
                ]);
            }
        }

        // Skirt strips: top (v=0), bottom (v=1), left (u=0), right (u=1).
        // Each strip duplicates its boundary row/column with skirt=1 and
        // stitches quads between the two.
        let boundary_rows: [Box<dyn Fn(usize) -> usize>; 4] = [
            Box::new(move |i| i),                 // top row
            Box::new(move |i| (g - 1) * g + i),   // bottom row
            Box::new(move |i| i * g),             // left column
            Box::new(move |i| i * g + (g - 1)),   // right column
        ];
        for edge in boundary_rows {
            let base = vertices.len() as u32;
            for i in 0..g {
                let src = vertices[edge(i)];
                vertices.push(GridVertex {
                    position: src.position,
                    uv: src.uv,
                    skirt: 1.0,
                });
            }
            for i in 0..g - 1 {
                let interior_a = edge(i) as u32;
                let interior_b = edge(i + 1) as u32;
                let skirt_a = base + i as u32;
                let skirt_b = base + i as u32 + 1;
                indices.extend([
                    interior_a, skirt_a, interior_b, interior_b, skirt_a, skirt_b,
                ]);
            }
        }

        let mut line_indices = Vec::with_capacity(4 * g * (g - 1));
        for row in 0..g {
            for col in 0..g {
                let here = (row * g + col) as u32;
                if col + 1 < g {
                    line_indices.extend([here, here + 1]);
                }
                if row + 1 < g {
                    line_indices.extend([here, here + g as u32]);
                }
            }
        }

        Self {
            grid_size,
            vertices,
            indices,
            line_indices,
        }
    }

    pub fn interior_vertex_count(&self) -> usize {
        (self.grid_size as usize) * (self.grid_size as usize)
    }
}

/// Mirror of the vertex shader's morph snap, used by the continuity tests.
///
/// `local` is the grid-local position in [-0.5, 0.5], `uv` the matching
/// texture coordinate. Odd-indexed vertices (uv * (G-1) odd) slide toward
/// the parent lattice as `morph` goes from 0 to 1.
pub fn morphed_world_position(
    local: Vec2,
    uv: Vec2,
    grid_size: u32,
    units_per_vertex: f32,
    center: Vec2,
    morph: f32,
) -> Vec2 {
    let cells = (grid_size - 1) as f32;
    let raw = local * units_per_vertex * cells + center;
    let parent_step = 2.0 * units_per_vertex;
    let snapped = (raw / parent_step).round() * parent_step;
    let index = uv * cells;
    let odd = Vec2::new(
        (index.x * 0.5).fract() * 2.0,
        (index.y * 0.5).fract() * 2.0,
    );
    Vec2::new(
        raw.x + (snapped.x - raw.x) * odd.x * morph,
        raw.y + (snapped.y - raw.y) * odd.y * morph,
    )
}

/// GPU buffers for the shared grid.
pub struct GridMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub line_index_buffer: wgpu::Buffer,
    pub index_count: u32,
    pub line_index_count: u32,
    pub grid_size: u32,
}

impl GridMesh {
    pub fn new(device: &wgpu::Device, data: &GridMeshData) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Grid Vertex Buffer"),
            contents: bytemuck::cast_slice(&data.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Grid Index Buffer"),
            contents: bytemuck::cast_slice(&data.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let line_index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Grid Line Index Buffer"),
            contents: bytemuck::cast_slice(&data.line_indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            line_index_buffer,
            index_count: data.indices.len() as u32,
            line_index_count: data.line_indices.len() as u32,
            grid_size: data.grid_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_and_index_counts() {
        let g = 9u32;
        let data = GridMeshData::new(g);
        let gs = g as usize;
        assert_eq!(data.vertices.len(), gs * gs + 4 * gs);
        // interior quads + 4 skirt strips
        assert_eq!(
            data.indices.len(),
            6 * (gs - 1) * (gs - 1) + 4 * 6 * (gs - 1)
        );
    }

    #[test]
    fn interior_vertices_span_unit_square() {
        let data = GridMeshData::new(5);
        let interior = &data.vertices[..data.interior_vertex_count()];
        let min_x = interior.iter().map(|v| v.position[0]).fold(f32::MAX, f32::min);
        let max_x = interior.iter().map(|v| v.position[0]).fold(f32::MIN, f32::max);
        assert_eq!(min_x, -0.5);
        assert_eq!(max_x, 0.5);
        assert!(interior.iter().all(|v| v.skirt == 0.0));
    }

    /// Every skirt vertex shares its XZ and UV with a boundary vertex.
    #[test]
    fn skirt_vertices_mirror_the_boundary() {
        let data = GridMeshData::new(7);
        let interior = data.interior_vertex_count();
        for v in &data.vertices[interior..] {
            assert_eq!(v.skirt, 1.0);
            let on_boundary = v.position[0].abs() == 0.5 || v.position[1].abs() == 0.5;
            assert!(on_boundary, "skirt vertex {v:?} not on the boundary");
            assert!(data.vertices[..interior]
                .iter()
                .any(|i| i.position == v.position && i.uv == v.uv));
        }
    }

    #[test]
    #[should_panic]
    fn even_grid_size_is_rejected() {
        GridMeshData::new(8);
    }

    /// At morph 1, odd vertices land exactly on the parent lattice.
    #[test]
    fn full_morph_snaps_to_parent_lattice() {
        let g = 9u32;
        let units = 2.0;
        let center = Vec2::new(36.0, -12.0);
        let data = GridMeshData::new(g);
        for v in &data.vertices[..data.interior_vertex_count()] {
            let p = morphed_world_position(
                Vec2::from(v.position),
                Vec2::from(v.uv),
                g,
                units,
                center,
                1.0,
            );
            let parent_step = 2.0 * units;
            let rx = (p.x / parent_step).round() * parent_step;
            let ry = (p.y / parent_step).round() * parent_step;
            assert!(
                (p.x - rx).abs() < 1e-4 && (p.y - ry).abs() < 1e-4,
                "vertex {:?} morphs to off-lattice {p:?}",
                v.position
            );
        }
    }

    /// Morph 0 leaves vertices at their native positions.
    #[test]
    fn zero_morph_is_identity() {
        let g = 9u32;
        let data = GridMeshData::new(g);
        for v in &data.vertices {
            let p = morphed_world_position(
                Vec2::from(v.position),
                Vec2::from(v.uv),
                g,
                4.0,
                Vec2::ZERO,
                0.0,
            );
            let raw = Vec2::from(v.position) * 4.0 * (g - 1) as f32;
            assert!((p - raw).length() < 1e-5);
        }
    }

    /// Shared-edge continuity: a fine patch at morph 1 produces the same
    /// edge positions as its coarser neighbor does natively.
    #[test]
    fn fine_patch_edge_matches_coarse_neighbor() {
        let g = 5u32;
        let cells = (g - 1) as f32;
        // Coarse patch of size 8 units-per-vertex 2, fine neighbor to its
        // right with units-per-vertex 1 (child LOD).
        let coarse_units = 2.0;
        let fine_units = 1.0;
        let coarse_center = Vec2::new(0.0, 0.0);
        let coarse_size = coarse_units * cells;
        let fine_size = fine_units * cells;
        let fine_center = Vec2::new(coarse_size * 0.5 + fine_size * 0.5, -fine_size * 0.5);

        // Right edge of the coarse patch, native resolution
        let mut coarse_edge: Vec<f32> = (0..g)
            .map(|i| {
                let local = Vec2::new(0.5, i as f32 / cells - 0.5);
                let uv = Vec2::new(1.0, i as f32 / cells);
                morphed_world_position(local, uv, g, coarse_units, coarse_center, 0.0).y
            })
            .collect();
        // Left edge of the fine patch, fully morphed toward its parent grid
        let fine_edge: Vec<f32> = (0..g)
            .map(|i| {
                let local = Vec2::new(-0.5, i as f32 / cells - 0.5);
                let uv = Vec2::new(0.0, i as f32 / cells);
                morphed_world_position(local, uv, g, fine_units, fine_center, 1.0).y
            })
            .collect();
        // Every fully-morphed fine vertex must coincide with some coarse
        // edge position (the fine edge covers half the coarse edge).
        coarse_edge.sort_by(f32::total_cmp);
        for z in fine_edge {
            assert!(
                coarse_edge.iter().any(|&c| (c - z).abs() < 1e-4),
                "fine edge vertex at z={z} has no coarse counterpart"
            );
        }
    }
}
