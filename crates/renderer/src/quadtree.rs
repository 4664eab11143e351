//! CDLOD quadtree and per-frame patch selection.
//!
//! The tree is a static, arena-allocated 4-ary subdivision of the terrain
//! square. Nodes refer to their parent and children by index, which sidesteps
//! ownership cycles and keeps the whole tree in one contiguous allocation.
//! It is rebuilt only when the world size or the height bounds change;
//! selection runs every frame and reuses one internal buffer, so the returned
//! borrow is valid exactly until the next `select` call.

use glam::{Mat4, Vec2, Vec3};

use crate::frustum::{Aabb, Frustum};

/// Margin by which node boxes are expanded before frustum testing, so
/// displacement that pokes slightly past the stored height bounds does not
/// flicker at screen edges.
const FRUSTUM_MARGIN: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadtreeConfig {
    /// Side length of the terrain square, centered at the origin.
    pub world_size: f32,
    /// Nodes are not subdivided below this size.
    pub min_node_size: f32,
    /// Maximum tree depth (root is level 0, leaves level `max_lod_levels`-1).
    pub max_lod_levels: u32,
    /// Conservative vertical bounds of the heightfield in world units.
    pub min_height: f32,
    pub max_height: f32,
}

/// One node of the quadtree.
#[derive(Debug, Clone)]
pub struct TerrainNode {
    /// World-space XZ center.
    pub center: Vec2,
    /// World-space side length.
    pub size: f32,
    /// 0 at the root, increasing toward the leaves.
    pub lod_level: u32,
    /// Integer grid coordinates at this node's LOD.
    pub grid: (u32, u32),
    /// Arena indices of the four children, subdivision order
    /// top-left, top-right, bottom-left, bottom-right.
    pub children: Option<[u32; 4]>,
    /// Arena index of the parent (`None` for the root).
    pub parent: Option<u32>,
    /// Transient morph factor written by the last selection pass.
    pub morph_factor: f32,
}

/// One emitted patch. Copies the node fields the renderer needs so the
/// instance upload never walks the arena again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedPatch {
    pub node: u32,
    pub center: Vec2,
    pub size: f32,
    pub lod_level: u32,
    pub morph_factor: f32,
}

/// Result of one selection pass. Valid until the next `select` call.
#[derive(Debug, Default)]
pub struct Selection {
    pub patches: Vec<SelectedPatch>,
    /// Nodes visited by the traversal.
    pub considered: u32,
    /// Nodes rejected by the frustum test (subtrees are not descended).
    pub culled: u32,
}

impl Selection {
    fn clear(&mut self) {
        self.patches.clear();
        self.considered = 0;
        self.culled = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// Distance thresholds for LOD splitting and morphing.
#[derive(Debug, Clone, Copy)]
pub struct SelectParams {
    /// Split threshold = node size * this.
    pub lod_distance_multiplier: f32,
    /// Fraction of the emission range over which a patch morphs toward its
    /// parent grid. Must be in (0, 1).
    pub morph_region: f32,
}

pub struct Quadtree {
    config: QuadtreeConfig,
    nodes: Vec<TerrainNode>,
    selection: Selection,
}

impl Quadtree {
    /// Build the full tree for `config`. Subdivision stops at
    /// `max_lod_levels` - 1 or when a child would fall below `min_node_size`.
    pub fn new(config: QuadtreeConfig) -> Self {
        let mut nodes = Vec::new();
        Self::build_node(
            &mut nodes,
            &config,
            Vec2::ZERO,
            config.world_size,
            0,
            (0, 0),
            None,
        );
        Self {
            config,
            nodes,
            selection: Selection::default(),
        }
    }

    fn build_node(
        nodes: &mut Vec<TerrainNode>,
        config: &QuadtreeConfig,
        center: Vec2,
        size: f32,
        lod_level: u32,
        grid: (u32, u32),
        parent: Option<u32>,
    ) -> u32 {
        let index = nodes.len() as u32;
        nodes.push(TerrainNode {
            center,
            size,
            lod_level,
            grid,
            children: None,
            parent,
            morph_factor: 0.0,
        });

        let child_size = size * 0.5;
        if lod_level + 1 < config.max_lod_levels && child_size >= config.min_node_size {
            let quarter = size * 0.25;
            // Top-left, top-right, bottom-left, bottom-right: -Z is "top".
            let offsets = [
                (Vec2::new(-quarter, -quarter), (0, 0)),
                (Vec2::new(quarter, -quarter), (1, 0)),
                (Vec2::new(-quarter, quarter), (0, 1)),
                (Vec2::new(quarter, quarter), (1, 1)),
            ];
            let mut children = [0u32; 4];
            for (slot, (offset, (dx, dy))) in offsets.into_iter().enumerate() {
                children[slot] = Self::build_node(
                    nodes,
                    config,
                    center + offset,
                    child_size,
                    lod_level + 1,
                    (grid.0 * 2 + dx, grid.1 * 2 + dy),
                    Some(index),
                );
            }
            nodes[index as usize].children = Some(children);
        }
        index
    }

    pub fn config(&self) -> &QuadtreeConfig {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: u32) -> &TerrainNode {
        &self.nodes[index as usize]
    }

    fn node_aabb(&self, node: &TerrainNode) -> Aabb {
        let half = node.size * 0.5;
        Aabb::new(
            Vec3::new(
                node.center.x - half,
                self.config.min_height,
                node.center.y - half,
            ),
            Vec3::new(
                node.center.x + half,
                self.config.max_height,
                node.center.y + half,
            ),
        )
    }

    /// Run one selection pass. Traversal is depth-first in child order
    /// (top-left, top-right, bottom-left, bottom-right), which makes the
    /// output order deterministic for identical inputs.
    pub fn select(&mut self, camera_pos: Vec3, view_proj: Mat4, params: SelectParams) -> &Selection {
        let mut selection = std::mem::take(&mut self.selection);
        selection.clear();
        let frustum = Frustum::from_view_projection(view_proj);
        self.visit(0, camera_pos, &frustum, params, &mut selection);
        self.selection = selection;
        &self.selection
    }

    /// Selection set from the most recent `select` call.
    pub fn last_selection(&self) -> &Selection {
        &self.selection
    }

    fn visit(
        &mut self,
        index: u32,
        camera_pos: Vec3,
        frustum: &Frustum,
        params: SelectParams,
        selection: &mut Selection,
    ) {
        selection.considered += 1;

        let (center, size, lod_level, children) = {
            let node = &self.nodes[index as usize];
            (node.center, node.size, node.lod_level, node.children)
        };

        let aabb = self
            .node_aabb(&self.nodes[index as usize])
            .expanded(FRUSTUM_MARGIN);
        if !frustum.intersects(&aabb) {
            selection.culled += 1;
            return;
        }

        // Distance to the node center at mid height. Including the vertical
        // axis keeps a camera high above the terrain from splitting all the
        // way to leaf level directly underneath itself.
        let mid_height = (self.config.min_height + self.config.max_height) * 0.5;
        let distance =
            (camera_pos - Vec3::new(center.x, mid_height, center.y)).length();
        let split_threshold = size * params.lod_distance_multiplier;

        if distance < split_threshold {
            if let Some(children) = children {
                for child in children {
                    self.visit(child, camera_pos, frustum, params, selection);
                }
                return;
            }
        }

        // A patch is emitted over distances up to its parent's split
        // threshold (twice its own); the morph ramp ends exactly there so
        // the handoff to the parent is seamless.
        let morph_end = 2.0 * split_threshold;
        let morph_start = morph_end * (1.0 - params.morph_region);
        let morph_factor =
            ((distance - morph_start) / (morph_end - morph_start)).clamp(0.0, 1.0);
        self.nodes[index as usize].morph_factor = morph_factor;
        selection.patches.push(SelectedPatch {
            node: index,
            center,
            size,
            lod_level,
            morph_factor,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> QuadtreeConfig {
        QuadtreeConfig {
            world_size: 1024.0,
            min_node_size: 1.0,
            max_lod_levels: 6,
            min_height: -90.0,
            max_height: 90.0,
        }
    }

    fn params() -> SelectParams {
        SelectParams {
            lod_distance_multiplier: 2.0,
            morph_region: 0.3,
        }
    }

    /// Looking straight down from high above with a wide fov so the whole
    /// terrain is in view.
    fn top_down_vp(height: f32) -> Mat4 {
        let proj = Mat4::perspective_infinite_reverse_rh(2.6, 1.0, 0.5);
        let view = Mat4::look_at_rh(
            Vec3::new(0.0, height, 0.0),
            Vec3::new(0.0, 0.0, 0.01),
            Vec3::Y,
        );
        proj * view
    }

    #[test]
    fn full_tree_node_count() {
        let tree = Quadtree::new(test_config());
        // 6 full levels: 1 + 4 + 16 + 64 + 256 + 1024
        assert_eq!(tree.node_count(), 1365);
    }

    #[test]
    fn min_node_size_limits_depth() {
        let tree = Quadtree::new(QuadtreeConfig {
            world_size: 64.0,
            min_node_size: 16.0,
            max_lod_levels: 10,
            min_height: 0.0,
            max_height: 1.0,
        });
        // 64 -> 32 -> 16; children of 16 would be 8 < min, so 3 levels.
        let deepest = (0..tree.node_count() as u32)
            .map(|i| tree.node(i).lod_level)
            .max()
            .unwrap();
        assert_eq!(deepest, 2);
    }

    /// Union of selected patches tiles the root square exactly: no gaps, no
    /// overlaps, regardless of camera position.
    #[test]
    fn selection_tiles_the_world() {
        let mut tree = Quadtree::new(test_config());
        for camera in [
            Vec3::new(0.0, 10.0, 0.0),
            Vec3::new(300.0, 50.0, -220.0),
            Vec3::new(-512.0, 200.0, 512.0),
        ] {
            let selection = tree.select(camera, top_down_vp(3000.0), params());
            let total_area: f64 = selection
                .patches
                .iter()
                .map(|p| (p.size as f64) * (p.size as f64))
                .sum();
            assert!(
                (total_area - 1024.0 * 1024.0).abs() < 1.0,
                "camera {camera:?}: area {total_area}"
            );
            // Overlap check: pairwise disjoint interiors
            for (i, a) in selection.patches.iter().enumerate() {
                for b in selection.patches.iter().skip(i + 1) {
                    let gap = (a.center - b.center).abs();
                    let min_gap = (a.size + b.size) * 0.5;
                    assert!(
                        gap.x > min_gap - 0.01 || gap.y > min_gap - 0.01,
                        "patches {a:?} and {b:?} overlap"
                    );
                }
            }
        }
    }

    /// Same camera and view must produce the same ordered list.
    #[test]
    fn selection_is_deterministic() {
        let mut tree = Quadtree::new(test_config());
        let camera = Vec3::new(130.0, 40.0, -75.0);
        let first: Vec<SelectedPatch> = tree
            .select(camera, top_down_vp(3000.0), params())
            .patches
            .clone();
        let second = tree.select(camera, top_down_vp(3000.0), params());
        assert_eq!(first, second.patches);
    }

    /// A camera far above the terrain only sees coarse nodes.
    #[test]
    fn distant_camera_selects_coarse_lods() {
        let mut tree = Quadtree::new(test_config());
        let selection = tree.select(Vec3::new(0.0, 1e4, 0.0), top_down_vp(1e4), params());
        assert!(!selection.is_empty());
        for patch in &selection.patches {
            assert!(
                patch.lod_level <= 2,
                "expected coarse LOD, got level {} at {:?}",
                patch.lod_level,
                patch.center
            );
        }
    }

    /// A camera hovering over the center sees the finest LOD there.
    #[test]
    fn near_camera_reaches_leaf_lod() {
        let mut tree = Quadtree::new(test_config());
        let selection = tree.select(Vec3::new(0.0, 10.0, 0.0), top_down_vp(3000.0), params());
        let finest = selection.patches.iter().map(|p| p.lod_level).max().unwrap();
        assert_eq!(finest, test_config().max_lod_levels - 1);
    }

    /// Morph factors stay in [0, 1] and reach 1 right before the parent
    /// takes over.
    #[test]
    fn morph_factor_ramps_to_one_at_handoff() {
        let mut tree = Quadtree::new(test_config());
        let p = params();
        let camera = Vec3::new(200.0, 30.0, 140.0);
        let selection = tree.select(camera, top_down_vp(3000.0), p);
        for patch in &selection.patches {
            assert!((0.0..=1.0).contains(&patch.morph_factor));
            let distance =
                (camera - Vec3::new(patch.center.x, 0.0, patch.center.y)).length();
            let handoff = 2.0 * patch.size * p.lod_distance_multiplier;
            if distance >= handoff {
                assert!((patch.morph_factor - 1.0).abs() < 1e-6);
            }
        }
    }

    /// Everything outside the frustum is culled; an empty selection is a
    /// valid outcome.
    #[test]
    fn camera_looking_away_culls_everything() {
        let mut tree = Quadtree::new(test_config());
        // Looking straight up from above the terrain
        let proj = Mat4::perspective_infinite_reverse_rh(0.8, 1.0, 0.5);
        let view = Mat4::look_at_rh(
            Vec3::new(0.0, 500.0, 0.0),
            Vec3::new(0.0, 1000.0, 0.01),
            Vec3::Y,
        );
        let selection = tree.select(Vec3::new(0.0, 500.0, 0.0), proj * view, params());
        assert!(selection.is_empty());
        assert!(selection.culled > 0);
    }
}
