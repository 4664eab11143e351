//! Free-fly camera with a reversed-Z projection.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3};

/// Fly camera driven by mouse look and WASD-style movement.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    /// Field of view in degrees.
    pub fov_degrees: f32,
    /// Near clipping plane. The far plane is at infinity (reversed-Z).
    pub near: f32,
    /// Aspect ratio (width / height).
    pub aspect: f32,
    /// Mouse sensitivity for look controls.
    pub sensitivity: f32,
    pitch: f32,
    yaw: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            fov_degrees: 60.0,
            near: 0.5,
            aspect: 16.0 / 9.0,
            sensitivity: 0.002,
            pitch: 0.0,
            yaw: 0.0,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    /// Process mouse movement for look controls.
    pub fn process_mouse(&mut self, delta_x: f32, delta_y: f32) {
        self.yaw -= delta_x * self.sensitivity;
        self.pitch -= delta_y * self.sensitivity;
        let max_pitch = std::f32::consts::FRAC_PI_2 - 0.01;
        self.pitch = self.pitch.clamp(-max_pitch, max_pitch);
    }

    /// Free-fly: move in camera space (strafe/forward from `move_xy`,
    /// vertical from `move_y`).
    pub fn process_fly(&mut self, move_xy: Vec2, move_y: f32, speed: f32, dt: f32) {
        let forward = self.forward();
        let right = self.right();

        let mut velocity = forward * move_xy.y + right * move_xy.x + Vec3::Y * move_y;
        if velocity.length_squared() > 0.0 {
            velocity = velocity.normalize() * speed * dt;
            self.position += velocity;
        }
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw) * Quat::from_rotation_x(self.pitch)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation() * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation() * Vec3::X
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    /// Reversed-Z projection: near maps to depth 1, infinity to depth 0,
    /// paired with a `Greater` depth test.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_infinite_reverse_rh(
            self.fov_degrees.to_radians(),
            self.aspect,
            self.near,
        )
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn set_yaw_pitch(&mut self, yaw: f32, pitch: f32) {
        self.yaw = yaw;
        let max_pitch = std::f32::consts::FRAC_PI_2 - 0.01;
        self.pitch = pitch.clamp(-max_pitch, max_pitch);
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }
}

/// Camera uniform data for GPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub position: [f32; 4], // w unused, padding
}

impl CameraUniform {
    pub fn new() -> Self {
        Self {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            position: [0.0; 4],
        }
    }

    pub fn update(&mut self, camera: &Camera) {
        self.view_proj = camera.view_projection_matrix().to_cols_array_2d();
        let pos = camera.position;
        self.position = [pos.x, pos.y, pos.z, 1.0];
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reversed-Z: closer points get larger depth values.
    #[test]
    fn reversed_z_depth_ordering() {
        let camera = Camera::new(Vec3::ZERO);
        let vp = camera.view_projection_matrix();
        let near_point = vp * glam::Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far_point = vp * glam::Vec4::new(0.0, 0.0, -100.0, 1.0);
        let near_depth = near_point.z / near_point.w;
        let far_depth = far_point.z / far_point.w;
        assert!(near_depth > far_depth);
        assert!(far_depth >= 0.0);
        assert!(near_depth <= 1.0);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.process_mouse(0.0, -1e6);
        assert!(camera.pitch() < std::f32::consts::FRAC_PI_2);
    }
}
