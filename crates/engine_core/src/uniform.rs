//! Byte-layout builder for uniform buffers.
//!
//! The renderer's larger uniform structs are assembled with this builder
//! instead of `#[repr(C)]` structs so the WGSL declaration can be mirrored
//! field by field with the alignment rules applied in one place. WGSL scalar
//! and vector alignments: f32/u32 align 4, vec2 aligns 8, vec3 and vec4 align
//! 16 (vec3 still occupies 12 bytes, so a following scalar packs into its
//! tail), mat4x4 aligns 16.

/// Appends fields with WGSL uniform alignment, yielding a contiguous byte
/// array whose layout mirrors the shader struct verbatim.
#[derive(Debug, Default)]
pub struct UniformBuilder {
    data: Vec<u8>,
}

impl UniformBuilder {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Insert zero padding until the current offset is a multiple of `align`.
    pub fn align_to(&mut self, align: usize) -> &mut Self {
        let rem = self.data.len() % align;
        if rem != 0 {
            self.data.resize(self.data.len() + align - rem, 0);
        }
        self
    }

    /// Zero-pad the buffer out to exactly `size` bytes.
    ///
    /// Panics if the contents already exceed `size`; layouts are static so
    /// that is a programming error, not a runtime condition.
    pub fn pad_to(&mut self, size: usize) -> &mut Self {
        assert!(
            self.data.len() <= size,
            "uniform contents ({} bytes) exceed padded size {}",
            self.data.len(),
            size
        );
        self.data.resize(size, 0);
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.align_to(4);
        self.data.extend_from_slice(bytemuck::bytes_of(&v));
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.align_to(4);
        self.data.extend_from_slice(bytemuck::bytes_of(&v));
        self
    }

    /// A WGSL `bool` packed into a u32 slot.
    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u32(v as u32)
    }

    pub fn vec2(&mut self, v: [f32; 2]) -> &mut Self {
        self.align_to(8);
        self.data.extend_from_slice(bytemuck::cast_slice(&v));
        self
    }

    pub fn vec3(&mut self, v: [f32; 3]) -> &mut Self {
        self.align_to(16);
        self.data.extend_from_slice(bytemuck::cast_slice(&v));
        self
    }

    pub fn vec4(&mut self, v: [f32; 4]) -> &mut Self {
        self.align_to(16);
        self.data.extend_from_slice(bytemuck::cast_slice(&v));
        self
    }

    /// Column-major 4x4 matrix, as produced by `Mat4::to_cols_array`.
    pub fn mat4(&mut self, m: [f32; 16]) -> &mut Self {
        self.align_to(16);
        self.data.extend_from_slice(bytemuck::cast_slice(&m));
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_packs_into_vec3_tail() {
        let mut b = UniformBuilder::new();
        b.vec3([1.0, 2.0, 3.0]).f32(4.0);
        // vec3 occupies 12 bytes, the f32 lands at offset 12
        assert_eq!(b.len(), 16);
        let floats: Vec<f32> = b
            .as_bytes()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(floats, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn vec3_after_scalar_is_padded() {
        let mut b = UniformBuilder::new();
        b.f32(1.0).vec3([2.0, 3.0, 4.0]);
        // vec3 aligns to 16: offsets 4..16 are padding
        assert_eq!(b.len(), 28);
        let floats: Vec<f32> = b
            .as_bytes()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(floats[0], 1.0);
        assert_eq!(&floats[4..], &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn vec2_aligns_to_eight() {
        let mut b = UniformBuilder::new();
        b.f32(1.0).vec2([2.0, 3.0]);
        assert_eq!(b.len(), 16);
    }

    #[test]
    fn mat4_is_sixty_four_bytes() {
        let mut b = UniformBuilder::new();
        b.mat4(glam::Mat4::IDENTITY.to_cols_array());
        assert_eq!(b.len(), 64);
    }

    #[test]
    fn pad_to_slot_size() {
        let mut b = UniformBuilder::new();
        b.mat4(glam::Mat4::IDENTITY.to_cols_array())
            .vec3([0.0; 3])
            .f32(1.0)
            .f32(2.0)
            .pad_to(256);
        assert_eq!(b.len(), 256);
    }

    #[test]
    #[should_panic]
    fn pad_to_rejects_overflow() {
        let mut b = UniformBuilder::new();
        b.mat4(glam::Mat4::IDENTITY.to_cols_array());
        b.pad_to(32);
    }
}
