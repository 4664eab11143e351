//! Error taxonomy for the terrain engine.
//!
//! Initialization and device-loss errors bubble up to the host; config and
//! state errors are recovered locally by the component that detects them.

use thiserror::Error;

/// Errors surfaced by the terrain engine.
#[derive(Debug, Error)]
pub enum TerrainError {
    /// Device feature missing or resource allocation failed. Fatal.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// WGSL compile/validation failure. The previous pipeline stays live.
    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),

    /// Invalid parameter, rejected before any GPU submission.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation not valid in the current state (e.g. regenerate while a
    /// generation is already running). Logged and ignored by callers.
    #[error("invalid state: {0}")]
    State(String),

    /// Device lost or dispatch error. The orchestrator marks itself
    /// uninitialized when it sees this.
    #[error("GPU execution failed: {0}")]
    GpuExecution(String),
}

pub type Result<T> = std::result::Result<T, TerrainError>;
