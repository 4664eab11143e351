//! View frustum extraction and AABB culling.

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// Axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Grow the box about its center by `factor` (0.1 = 10% larger extents).
    pub fn expanded(&self, factor: f32) -> Self {
        let center = self.center();
        let half = (self.max - self.min) * 0.5 * (1.0 + factor);
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Corner of the box farthest along `direction` (the positive vertex).
    pub fn positive_vertex(&self, direction: Vec3) -> Vec3 {
        Vec3::new(
            if direction.x >= 0.0 { self.max.x } else { self.min.x },
            if direction.y >= 0.0 { self.max.y } else { self.min.y },
            if direction.z >= 0.0 { self.max.z } else { self.min.z },
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Plane {
    normal: Vec3,
    d: f32,
}

impl Plane {
    fn from_coefficients(v: Vec4) -> Self {
        let normal = v.xyz();
        let len = normal.length();
        if len > 0.0 {
            Self {
                normal: normal / len,
                d: v.w / len,
            }
        } else {
            Self { normal, d: v.w }
        }
    }

    fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// Six planes extracted from a view-projection matrix (Gribb/Hartmann),
/// normals pointing into the frustum. Assumes WebGPU clip space (z in
/// [0, 1]); reversed-Z projections work unchanged since near/far swap roles
/// but both half-spaces are still bounded by the same rows.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    pub fn from_view_projection(view_proj: Mat4) -> Self {
        let row = |i: usize| {
            Vec4::new(
                view_proj.x_axis[i],
                view_proj.y_axis[i],
                view_proj.z_axis[i],
                view_proj.w_axis[i],
            )
        };
        let r0 = row(0);
        let r1 = row(1);
        let r2 = row(2);
        let r3 = row(3);

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0), // left
                Plane::from_coefficients(r3 - r0), // right
                Plane::from_coefficients(r3 + r1), // bottom
                Plane::from_coefficients(r3 - r1), // top
                Plane::from_coefficients(r2),      // near (z >= 0)
                Plane::from_coefficients(r3 - r2), // far (z <= w)
            ],
        }
    }

    /// Conservative AABB test: the box is culled only if some plane has its
    /// farthest-positive corner on the negative side.
    pub fn intersects(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            let p = aabb.positive_vertex(plane.normal);
            if plane.signed_distance(p) < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn look_down_z() -> Frustum {
        // Camera at origin looking down -Z, 90 degree fov
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 1000.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        Frustum::from_view_projection(proj * view)
    }

    #[test]
    fn box_in_front_is_visible() {
        let f = look_down_z();
        let b = Aabb::new(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0));
        assert!(f.intersects(&b));
    }

    #[test]
    fn box_behind_is_culled() {
        let f = look_down_z();
        let b = Aabb::new(Vec3::new(-1.0, -1.0, 9.0), Vec3::new(1.0, 1.0, 11.0));
        assert!(!f.intersects(&b));
    }

    #[test]
    fn box_far_to_the_side_is_culled() {
        let f = look_down_z();
        let b = Aabb::new(
            Vec3::new(1000.0, -1.0, -11.0),
            Vec3::new(1002.0, 1.0, -9.0),
        );
        assert!(!f.intersects(&b));
    }

    #[test]
    fn straddling_box_is_visible() {
        let f = look_down_z();
        // Huge box surrounding the whole frustum
        let b = Aabb::new(Vec3::splat(-1e5), Vec3::splat(1e5));
        assert!(f.intersects(&b));
    }

    #[test]
    fn reversed_z_projection_matches() {
        let proj = Mat4::perspective_infinite_reverse_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let f = Frustum::from_view_projection(proj * view);
        let front = Aabb::new(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0));
        let behind = Aabb::new(Vec3::new(-1.0, -1.0, 9.0), Vec3::new(1.0, 1.0, 11.0));
        assert!(f.intersects(&front));
        assert!(!f.intersects(&behind));
    }

    #[test]
    fn expansion_grows_extents() {
        let b = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)).expanded(0.1);
        assert!((b.max.x - 1.1).abs() < 1e-6);
        assert!((b.min.x + 1.1).abs() < 1e-6);
    }
}
