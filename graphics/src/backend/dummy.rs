//! Recording backend for tests and headless tools.
//!
//! [`DummyContext`] performs no GPU work. Every native call is appended to
//! a log of [`NativeCall`]s so tests can assert exactly what a shader object
//! asked the driver to do. [`DummyCompiler`] stands in for a real compiler
//! when a test needs hand-written reflection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::GraphicsError;
use crate::resources::{Buffer, ResourceId, Sampler, Texture};
use crate::shader::compiler::{CompileRequest, CompiledStage, NagaCompiler, ShaderCompiler};
use crate::shader::reflection::StageReflection;
use crate::types::{BufferDescriptor, SamplerDescriptor, ShaderStage, TextureDescriptor};

use super::{GpuBuffer, GpuProgram, GpuSampler, GpuTexture, ProgramStage, RenderContext};

/// A native call issued through [`DummyContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCall {
    CreateConstantBuffer { id: u64, size: u32 },
    UpdateConstantBuffer { id: u64, data: Vec<u8> },
    CreateProgram { id: u64, stages: Vec<ShaderStage> },
    SetProgram { id: u64 },
    SetConstantBuffers { stage: ShaderStage, buffers: Vec<Option<u64>> },
    SetTextures { stage: ShaderStage, textures: Vec<Option<ResourceId>> },
    SetSamplers { stage: ShaderStage, samplers: Vec<Option<ResourceId>> },
    SetBuffers { stage: ShaderStage, buffers: Vec<Option<ResourceId>> },
}

/// Render context that records native calls.
pub struct DummyContext {
    compiler: Box<dyn ShaderCompiler>,
    calls: Vec<NativeCall>,
    next_id: u64,
    fail_link: bool,
}

impl DummyContext {
    /// Create a context compiling with [`NagaCompiler`].
    pub fn new() -> Self {
        Self::with_compiler(Box::new(NagaCompiler::new()))
    }

    /// Create a context with a custom compiler.
    pub fn with_compiler(compiler: Box<dyn ShaderCompiler>) -> Self {
        log::info!("DummyContext: using {} compiler", compiler.name());
        Self {
            compiler,
            calls: Vec::new(),
            next_id: 1,
            fail_link: false,
        }
    }

    /// Make every following `create_program` fail.
    pub fn set_fail_link(&mut self, fail: bool) {
        self.fail_link = fail;
    }

    /// Calls recorded so far.
    pub fn calls(&self) -> &[NativeCall] {
        &self.calls
    }

    /// Forget recorded calls.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Take recorded calls, leaving the log empty.
    pub fn take_calls(&mut self) -> Vec<NativeCall> {
        std::mem::take(&mut self.calls)
    }

    /// Number of constant-buffer uploads recorded.
    pub fn upload_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, NativeCall::UpdateConstantBuffer { .. }))
            .count()
    }

    /// Last upload to the buffer with `id`.
    pub fn last_upload(&self, id: u64) -> Option<&[u8]> {
        self.calls.iter().rev().find_map(|c| match c {
            NativeCall::UpdateConstantBuffer { id: target, data } if *target == id => {
                Some(data.as_slice())
            }
            _ => None,
        })
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for DummyContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyContext")
            .field("compiler", &self.compiler.name())
            .field("calls", &self.calls.len())
            .finish_non_exhaustive()
    }
}

fn buffer_id(buffer: &GpuBuffer) -> u64 {
    match buffer {
        GpuBuffer::Dummy { id } => *id,
        #[cfg(feature = "wgpu-backend")]
        GpuBuffer::Wgpu(_) => 0,
    }
}

fn program_id(program: &GpuProgram) -> u64 {
    match program {
        GpuProgram::Dummy { id } => *id,
        #[cfg(feature = "wgpu-backend")]
        GpuProgram::Wgpu(_) => 0,
    }
}

impl RenderContext for DummyContext {
    fn name(&self) -> &'static str {
        "Dummy Context"
    }

    fn compiler(&self) -> &dyn ShaderCompiler {
        self.compiler.as_ref()
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<Arc<Texture>, GraphicsError> {
        log::trace!(
            "DummyContext: creating texture {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.depth_or_layers
        );
        Ok(Arc::new(Texture::new(descriptor.clone(), GpuTexture::Dummy)))
    }

    fn create_sampler(&mut self, descriptor: &SamplerDescriptor) -> Result<Arc<Sampler>, GraphicsError> {
        log::trace!("DummyContext: creating sampler {:?}", descriptor.label);
        Ok(Arc::new(Sampler::new(descriptor.clone(), GpuSampler::Dummy)))
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<Arc<Buffer>, GraphicsError> {
        log::trace!(
            "DummyContext: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let id = self.allocate_id();
        Ok(Arc::new(Buffer::new(descriptor.clone(), GpuBuffer::Dummy { id })))
    }

    fn create_constant_buffer(&mut self, label: &str, size: u32) -> Result<GpuBuffer, GraphicsError> {
        let id = self.allocate_id();
        log::trace!("DummyContext: creating constant buffer `{label}` #{id} ({size} bytes)");
        self.calls.push(NativeCall::CreateConstantBuffer { id, size });
        Ok(GpuBuffer::Dummy { id })
    }

    fn update_constant_buffer(&mut self, buffer: &GpuBuffer, data: &[u8]) {
        let id = buffer_id(buffer);
        log::trace!("DummyContext: uploading {} bytes to #{id}", data.len());
        self.calls.push(NativeCall::UpdateConstantBuffer {
            id,
            data: data.to_vec(),
        });
    }

    fn create_program(&mut self, stages: &[ProgramStage<'_>]) -> Result<GpuProgram, GraphicsError> {
        if self.fail_link {
            return Err(GraphicsError::LinkFailed(
                "DummyContext: linking disabled".to_string(),
            ));
        }
        let id = self.allocate_id();
        self.calls.push(NativeCall::CreateProgram {
            id,
            stages: stages.iter().map(|s| s.stage).collect(),
        });
        Ok(GpuProgram::Dummy { id })
    }

    fn set_program(&mut self, program: &GpuProgram) {
        self.calls.push(NativeCall::SetProgram {
            id: program_id(program),
        });
    }

    fn set_constant_buffers(&mut self, stage: ShaderStage, buffers: &[Option<&GpuBuffer>]) {
        self.calls.push(NativeCall::SetConstantBuffers {
            stage,
            buffers: buffers.iter().map(|b| b.map(buffer_id)).collect(),
        });
    }

    fn set_textures(&mut self, stage: ShaderStage, textures: &[Option<Arc<Texture>>]) {
        self.calls.push(NativeCall::SetTextures {
            stage,
            textures: textures.iter().map(|t| t.as_ref().map(|t| t.id())).collect(),
        });
    }

    fn set_samplers(&mut self, stage: ShaderStage, samplers: &[Option<Arc<Sampler>>]) {
        self.calls.push(NativeCall::SetSamplers {
            stage,
            samplers: samplers.iter().map(|s| s.as_ref().map(|s| s.id())).collect(),
        });
    }

    fn set_buffers(&mut self, stage: ShaderStage, buffers: &[Option<Arc<Buffer>>]) {
        self.calls.push(NativeCall::SetBuffers {
            stage,
            buffers: buffers.iter().map(|b| b.as_ref().map(|b| b.id())).collect(),
        });
    }
}

/// Compiler returning hand-written reflection per entry point.
///
/// ```ignore
/// let compiler = DummyCompiler::new()
///     .with_stage("DrawPS", StageReflection::new(ShaderStage::Pixel))
///     .with_failure("BrokenVS");
/// ```
#[derive(Debug, Default)]
pub struct DummyCompiler {
    reflections: HashMap<String, StageReflection>,
    failing: HashSet<String>,
    compiles: AtomicUsize,
}

impl DummyCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflection returned for `entry_point`.
    pub fn with_stage(mut self, entry_point: impl Into<String>, reflection: StageReflection) -> Self {
        self.reflections.insert(entry_point.into(), reflection);
        self
    }

    /// Make compiling `entry_point` fail.
    pub fn with_failure(mut self, entry_point: impl Into<String>) -> Self {
        self.failing.insert(entry_point.into());
        self
    }

    /// Number of compile calls so far.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }
}

impl ShaderCompiler for DummyCompiler {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledStage, GraphicsError> {
        self.compiles.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(request.entry_point) {
            return Err(GraphicsError::CompilationFailed {
                stage: request.stage,
                entry_point: request.entry_point.to_string(),
                message: "forced failure".to_string(),
            });
        }
        Ok(CompiledStage::new(
            request.stage,
            request.entry_point,
            request.profile,
            format!("// {} {}", request.stage, request.entry_point),
        ))
    }

    fn reflect(&self, compiled: &CompiledStage) -> Result<StageReflection, GraphicsError> {
        let reflection = self.reflections.get(compiled.entry_point()).ok_or_else(|| {
            GraphicsError::ReflectionFailed(format!(
                "no reflection for `{}`",
                compiled.entry_point()
            ))
        })?;
        if reflection.stage != compiled.stage() {
            return Err(GraphicsError::ReflectionFailed(format!(
                "`{}` reflects a {} stage, compiled as {}",
                compiled.entry_point(),
                reflection.stage,
                compiled.stage()
            )));
        }
        reflection.validate()?;
        Ok(reflection.clone())
    }
}
