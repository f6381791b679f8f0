//! # KlayGE Graphics
//!
//! Shader parameter binding and constant-buffer management for effects.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Effect`] - parameters, techniques and passes loaded from a description
//! - [`ShaderObject`] - one compiled pass that copies parameter values into
//!   constant buffers and resource slots on every bind
//! - [`RenderContext`] - trait for backend implementations
//! - Multiple backend support: wgpu and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use klayge_graphics::{DummyContext, Effect, ShaderObject, ShaderSettings};
//!
//! let effect = Effect::from_ron(&text)?;
//! let mut ctx = DummyContext::new();
//! let mut object = ShaderObject::new(ShaderSettings::default());
//! object.set_shader(&mut ctx, &effect, "Tonemap", 0)?;
//! effect.parameter_by_name("exposure").unwrap().set(2.5f32)?;
//! object.bind(&mut ctx);
//! ```

pub mod backend;
pub mod config;
pub mod effect;
pub mod error;
pub mod resources;
pub mod shader;
pub mod types;

// Re-export main types for convenience
pub use backend::dummy::{DummyCompiler, DummyContext, NativeCall};
pub use backend::{GpuBuffer, GpuProgram, GpuSampler, GpuTexture, ProgramStage, RenderContext};
pub use config::{ShaderSettings, UnresolvedPolicy};
pub use effect::{
    CombinedSampler, Effect, EffectDescriptor, EffectParameter, ParameterType, Pass, ShaderDesc,
    Technique,
};
pub use error::GraphicsError;
pub use resources::{Buffer, ResourceId, Sampler, Texture};
pub use shader::{
    CacheSnapshot, NagaCompiler, ShaderCache, ShaderCompiler, ShaderObject, ShaderObjectState,
    StageReflection,
};
pub use types::{
    BufferDescriptor, PerStage, SamplerDescriptor, ScalarType, ShaderStage, ShaderStageFlags,
    TextureDescriptor, TextureDimension, TextureFormat,
};

#[cfg(feature = "wgpu-backend")]
pub use backend::wgpu_backend::WgpuContext;

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// Logs the crate version and the backends compiled in.
pub fn init() {
    log::info!(
        "KlayGE Graphics v{} initialized (gpu backend: {})",
        VERSION,
        backend::has_gpu_backend()
    );
}
