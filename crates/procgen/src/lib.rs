//! GPU generation pipeline for the terrain heightfield.
//!
//! Everything here runs as compute work: FBM noise synthesis, hydraulic and
//! thermal erosion, the mipmap chain, the normal map and the island mask.
//! The CPU only orchestrates dispatches and (optionally) reads the finished
//! heightfield back for height queries.

pub mod erosion;
pub mod heightfield;
pub mod island;
pub mod mipmap;
pub mod noise_gen;
pub mod normal_gen;

pub use erosion::*;
pub use heightfield::*;
pub use island::*;
pub use mipmap::*;
pub use noise_gen::*;
pub use normal_gen::*;
