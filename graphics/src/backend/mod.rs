//! Render context abstraction.
//!
//! Shader objects never reach for a global device. Every operation that
//! touches the GPU takes a `&mut dyn RenderContext`, which owns the shader
//! compiler and issues the native resource and binding calls.
//!
//! # Available Backends
//!
//! - `dummy` (default): records every native call for inspection in tests
//! - `wgpu-backend`: cross-platform backend using wgpu

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub mod dummy;

use std::sync::Arc;

use crate::error::GraphicsError;
use crate::resources::{Buffer, Sampler, Texture};
use crate::shader::compiler::{CompiledStage, ShaderCompiler};
use crate::shader::reflection::StageReflection;
use crate::types::{BufferDescriptor, SamplerDescriptor, ShaderStage, TextureDescriptor};

/// Handle to a GPU buffer.
#[derive(Debug, Clone)]
pub enum GpuBuffer {
    /// Dummy backend buffer, identified for call recording
    Dummy { id: u64 },
    /// wgpu backend buffer
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Buffer>),
}

/// Handle to a GPU texture.
#[derive(Debug, Clone)]
pub enum GpuTexture {
    /// Dummy backend (no GPU allocation)
    Dummy,
    /// wgpu backend texture
    #[cfg(feature = "wgpu-backend")]
    Wgpu {
        texture: Arc<wgpu::Texture>,
        view: Arc<wgpu::TextureView>,
    },
}

/// Handle to a GPU sampler.
#[derive(Debug, Clone)]
pub enum GpuSampler {
    /// Dummy backend (no GPU allocation)
    Dummy,
    /// wgpu backend sampler
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Sampler>),
}

/// Handle to a linked GPU program.
#[derive(Debug, Clone)]
pub enum GpuProgram {
    /// Dummy backend program
    Dummy { id: u64 },
    /// wgpu backend program
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu_backend::WgpuProgram>),
}

/// One stage handed to [`RenderContext::create_program`].
#[derive(Debug, Clone, Copy)]
pub struct ProgramStage<'a> {
    pub stage: ShaderStage,
    pub compiled: &'a CompiledStage,
    pub reflection: &'a StageReflection,
}

/// Capability interface of the active renderer.
///
/// Binding calls take whole slot arrays; `None` clears a slot.
pub trait RenderContext {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    /// Shader compiler of this backend.
    fn compiler(&self) -> &dyn ShaderCompiler;

    /// Create a texture resource.
    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<Arc<Texture>, GraphicsError>;

    /// Create a sampler resource.
    fn create_sampler(&mut self, descriptor: &SamplerDescriptor) -> Result<Arc<Sampler>, GraphicsError>;

    /// Create a structured/raw buffer resource.
    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<Arc<Buffer>, GraphicsError>;

    /// Create a GPU constant buffer of `size` bytes.
    fn create_constant_buffer(&mut self, label: &str, size: u32) -> Result<GpuBuffer, GraphicsError>;

    /// Upload the full contents of a constant buffer.
    fn update_constant_buffer(&mut self, buffer: &GpuBuffer, data: &[u8]);

    /// Link compiled stages into a program.
    fn create_program(&mut self, stages: &[ProgramStage<'_>]) -> Result<GpuProgram, GraphicsError>;

    /// Make `program` current.
    fn set_program(&mut self, program: &GpuProgram);

    /// Bind constant buffers to the slots of `stage`.
    fn set_constant_buffers(&mut self, stage: ShaderStage, buffers: &[Option<&GpuBuffer>]);

    /// Bind textures to the slots of `stage`.
    fn set_textures(&mut self, stage: ShaderStage, textures: &[Option<Arc<Texture>>]);

    /// Bind samplers to the slots of `stage`.
    fn set_samplers(&mut self, stage: ShaderStage, samplers: &[Option<Arc<Sampler>>]);

    /// Bind structured/raw buffers to the slots of `stage`.
    fn set_buffers(&mut self, stage: ShaderStage, buffers: &[Option<Arc<Buffer>>]);
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "wgpu-backend")
}
