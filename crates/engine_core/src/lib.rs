//! Core types shared across the terrain engine:
//! - Configuration structs with validation and partial-update merging
//! - The error taxonomy used at crate boundaries
//! - A byte-layout builder for mirroring WGSL uniform structs
//! - Frame timing

pub mod config;
pub mod error;
pub mod time;
pub mod uniform;

pub use config::*;
pub use error::*;
pub use time::*;
pub use uniform::*;

// Re-export commonly used math types
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
