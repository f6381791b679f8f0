//! Shader compilation.
//!
//! A [`ShaderCompiler`] turns generated effect source into a
//! [`CompiledStage`] and reflects it. [`NagaCompiler`] is the reference
//! implementation: it parses GLSL 450 with naga, validates it, reflects the
//! IR and emits WGSL as the stage's backend code.

use std::sync::Arc;

use klayge_core::profiling::profile_scope;

use crate::error::GraphicsError;
use crate::types::ShaderStage;

use super::reflection::{reflect_module, StageReflection};

/// Input to a single-stage compile.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Stage being compiled.
    pub stage: ShaderStage,
    /// Complete source text of the effect.
    pub source: &'a str,
    /// Entry function name.
    pub entry_point: &'a str,
    /// Target profile (for example `ps_5_0`).
    pub profile: &'a str,
    /// Preprocessor macros, later entries win.
    pub macros: &'a [(String, String)],
}

/// Validated naga IR kept alongside a compiled stage.
#[derive(Debug)]
pub struct NagaIr {
    pub module: naga::Module,
    pub info: naga::valid::ModuleInfo,
}

/// Result of compiling one stage.
///
/// Compiled stages are immutable and shared between every shader object
/// that uses them.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    stage: ShaderStage,
    entry_point: String,
    profile: String,
    code: Arc<str>,
    ir: Option<Arc<NagaIr>>,
}

impl CompiledStage {
    /// Wrap backend code.
    pub fn new(
        stage: ShaderStage,
        entry_point: impl Into<String>,
        profile: impl Into<String>,
        code: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            stage,
            entry_point: entry_point.into(),
            profile: profile.into(),
            code: code.into(),
            ir: None,
        }
    }

    /// Attach naga IR.
    pub fn with_ir(mut self, ir: NagaIr) -> Self {
        self.ir = Some(Arc::new(ir));
        self
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Entry point name as written in the effect.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Backend code (WGSL for the naga compiler).
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn ir(&self) -> Option<&NagaIr> {
        self.ir.as_deref()
    }
}

/// Backend shader compiler.
pub trait ShaderCompiler: Send + Sync {
    /// Compiler name used in logs.
    fn name(&self) -> &'static str;

    /// Compile one stage.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledStage, GraphicsError>;

    /// Reflect a compiled stage.
    fn reflect(&self, compiled: &CompiledStage) -> Result<StageReflection, GraphicsError>;
}

/// Name of the entry point in naga-compiled modules.
pub const NAGA_ENTRY_POINT: &str = "main";

/// GLSL compiler built on naga.
///
/// The effect entry function is renamed to `main` through a preprocessor
/// define, and the stage symbol (for example `KLAYGE_PIXEL_SHADER`) is
/// defined so one source can hold every stage.
#[derive(Debug, Default)]
pub struct NagaCompiler;

impl NagaCompiler {
    pub fn new() -> Self {
        Self
    }

    fn naga_stage(stage: ShaderStage) -> Result<naga::ShaderStage, GraphicsError> {
        match stage {
            ShaderStage::Vertex => Ok(naga::ShaderStage::Vertex),
            ShaderStage::Pixel => Ok(naga::ShaderStage::Fragment),
            ShaderStage::Compute => Ok(naga::ShaderStage::Compute),
            other => Err(GraphicsError::FeatureNotSupported(format!(
                "{other} shaders are not supported by the naga compiler"
            ))),
        }
    }

    fn validate(module: &naga::Module) -> Result<naga::valid::ModuleInfo, String> {
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(module)
        .map_err(|e| format!("validation error: {e}"))
    }
}

impl ShaderCompiler for NagaCompiler {
    fn name(&self) -> &'static str {
        "naga"
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledStage, GraphicsError> {
        profile_scope!("naga_compile");

        let failed = |message: String| GraphicsError::CompilationFailed {
            stage: request.stage,
            entry_point: request.entry_point.to_string(),
            message,
        };

        let mut defines = naga::FastHashMap::default();
        for (name, value) in request.macros {
            defines.insert(name.clone(), value.clone());
        }
        defines.insert(request.stage.define().to_string(), "1".to_string());
        if request.entry_point != NAGA_ENTRY_POINT {
            defines.insert(
                request.entry_point.to_string(),
                NAGA_ENTRY_POINT.to_string(),
            );
        }

        let options = naga::front::glsl::Options {
            stage: Self::naga_stage(request.stage)?,
            defines,
        };
        let module = naga::front::glsl::Frontend::default()
            .parse(&options, request.source)
            .map_err(|errors| failed(format!("GLSL parse error:\n{errors}")))?;
        let info = Self::validate(&module).map_err(failed)?;
        let wgsl = naga::back::wgsl::write_string(
            &module,
            &info,
            naga::back::wgsl::WriterFlags::empty(),
        )
        .map_err(|e| failed(format!("WGSL generation error: {e}")))?;

        log::debug!(
            "naga: compiled {} `{}` ({}, {} bytes of WGSL)",
            request.stage,
            request.entry_point,
            request.profile,
            wgsl.len()
        );

        Ok(
            CompiledStage::new(request.stage, request.entry_point, request.profile, wgsl)
                .with_ir(NagaIr { module, info }),
        )
    }

    fn reflect(&self, compiled: &CompiledStage) -> Result<StageReflection, GraphicsError> {
        profile_scope!("naga_reflect");

        if let Some(ir) = compiled.ir() {
            return reflect_module(compiled.stage(), &ir.module, &ir.info, NAGA_ENTRY_POINT);
        }

        // Stages restored from a cache snapshot carry only WGSL.
        let module = naga::front::wgsl::parse_str(compiled.code())
            .map_err(|e| GraphicsError::ReflectionFailed(e.emit_to_string(compiled.code())))?;
        let info = Self::validate(&module).map_err(GraphicsError::ReflectionFailed)?;
        reflect_module(compiled.stage(), &module, &info, NAGA_ENTRY_POINT)
    }
}
