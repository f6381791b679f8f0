//! Shader objects: one compiled pass and its per-frame binding state.
//!
//! A [`ShaderObject`] compiles the stages of one pass of an effect, links
//! them, and builds a bind table that copies effect parameters into
//! constant buffers and resource slots. Rendering code calls
//! [`ShaderObject::bind`] once per draw.
//!
//! # Example
//!
//! ```ignore
//! let effect = Effect::from_ron(&text)?;
//! let mut ctx = DummyContext::new();
//! let mut object = ShaderObject::new(ShaderSettings::default());
//! object.set_shader(&mut ctx, &effect, "Tonemap", 0)?;
//!
//! effect.parameter_by_name("exposure").unwrap().set(2.5f32)?;
//! object.bind(&mut ctx);
//! ```

use std::sync::Arc;

use klayge_core::profiling::profile_scope;

use crate::backend::{GpuBuffer, ProgramStage, RenderContext};
use crate::config::ShaderSettings;
use crate::effect::{Effect, Pass, ShaderDesc};
use crate::error::GraphicsError;
use crate::types::{PerStage, ShaderStage, ShaderStageFlags};

use super::bind::{build_bind_table, ParameterBind};
use super::cache::{CachedStage, LinkedProgram, PerStageKeys, ProgramKey, StageKey};
use super::compiler::CompileRequest;
use super::slots::ResourceSlotTable;
use super::staging::{ConstantBuffer, ConstantBufferStore};

/// Lifecycle state of a shader object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShaderObjectState {
    /// No pass has been set.
    #[default]
    Uncompiled,
    /// Every requested stage compiled and the bind table is built.
    Valid,
    /// Compiling, linking or building the bind table failed.
    Invalid,
}

/// One pass of an effect, ready to bind.
#[derive(Debug, Default)]
pub struct ShaderObject {
    settings: ShaderSettings,
    state: ShaderObjectState,
    requested: ShaderStageFlags,
    stage_valid: PerStage<bool>,
    program: Option<Arc<LinkedProgram>>,
    binds: Vec<ParameterBind>,
    buffers: ConstantBufferStore,
    slots: PerStage<ResourceSlotTable>,
}

impl ShaderObject {
    pub fn new(settings: ShaderSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &ShaderSettings {
        &self.settings
    }

    pub fn state(&self) -> ShaderObjectState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == ShaderObjectState::Valid
    }

    /// Whether `stage` was requested by the pass and compiled.
    pub fn is_stage_valid(&self, stage: ShaderStage) -> bool {
        self.stage_valid[stage]
    }

    /// Stages the current pass asked for.
    pub fn requested_stages(&self) -> ShaderStageFlags {
        self.requested
    }

    /// Linked program, shared with clones and aliasing passes.
    pub fn program(&self) -> Option<&Arc<LinkedProgram>> {
        self.program.as_ref()
    }

    pub fn binds(&self) -> &[ParameterBind] {
        &self.binds
    }

    /// Staging state of the constant buffer named `name`.
    pub fn constant_buffer(&self, name: &str) -> Option<&ConstantBuffer> {
        self.buffers.by_name(name)
    }

    pub fn constant_buffers(&self) -> &ConstantBufferStore {
        &self.buffers
    }

    pub fn slot_table(&self, stage: ShaderStage) -> &ResourceSlotTable {
        &self.slots[stage]
    }

    fn reset(&mut self) {
        self.state = ShaderObjectState::Uncompiled;
        self.requested = ShaderStageFlags::empty();
        self.stage_valid = PerStage::default();
        self.program = None;
        self.binds.clear();
        self.buffers = ConstantBufferStore::default();
        self.slots = PerStage::default();
    }

    /// Compile and link `pass` of `technique`, then build the bind table.
    ///
    /// On failure the object is left [`ShaderObjectState::Invalid`] and
    /// `bind()` does nothing; the error is logged and returned.
    pub fn set_shader(
        &mut self,
        ctx: &mut dyn RenderContext,
        effect: &Effect,
        technique: &str,
        pass: usize,
    ) -> Result<(), GraphicsError> {
        profile_scope!("set_shader");
        self.reset();

        let result = self.attach(ctx, effect, technique, pass);
        match &result {
            Ok(()) => {
                self.state = ShaderObjectState::Valid;
                log::debug!(
                    "shader object: `{}` / `{technique}` / pass {pass} ready ({} binds, {} constant buffers)",
                    effect.name(),
                    self.binds.len(),
                    self.buffers.len()
                );
            }
            Err(err) => {
                self.state = ShaderObjectState::Invalid;
                self.program = None;
                self.binds.clear();
                log::error!(
                    "shader object: `{}` / `{technique}` / pass {pass} failed on {}: {err}",
                    effect.name(),
                    ctx.name()
                );
            }
        }
        result
    }

    fn attach(
        &mut self,
        ctx: &mut dyn RenderContext,
        effect: &Effect,
        technique: &str,
        pass_index: usize,
    ) -> Result<(), GraphicsError> {
        let pass = effect
            .technique_by_name(technique)
            .and_then(|t| t.pass(pass_index))
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "effect `{}` has no pass {pass_index} in technique `{technique}`",
                    effect.name()
                ))
            })?;
        self.requested = pass.stages();
        if self.requested.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "pass `{}` has no shader stages",
                pass.name()
            )));
        }
        if self.settings.log_generated_source {
            log::debug!("generated source of `{}`:\n{}", effect.name(), effect.source());
        }

        let program = self.program_for(ctx, effect, pass)?;
        self.binds = build_bind_table(effect, &program, self.settings.unresolved)?;
        self.buffers = ConstantBufferStore::create(ctx, program.cbuffers())?;
        self.slots = Self::slot_tables(&program);
        self.program = Some(program);
        Ok(())
    }

    fn shader_desc<'e>(effect: &'e Effect, pass: &Pass, stage: ShaderStage) -> Result<&'e ShaderDesc, GraphicsError> {
        pass.shader_desc_id(stage)
            .and_then(|id| effect.shader_desc(id))
            .ok_or_else(|| {
                GraphicsError::Internal(format!("pass `{}` lost its {stage} description", pass.name()))
            })
    }

    fn program_for(
        &mut self,
        ctx: &mut dyn RenderContext,
        effect: &Effect,
        pass: &Pass,
    ) -> Result<Arc<LinkedProgram>, GraphicsError> {
        let use_cache = self.settings.use_shader_cache;
        let cache = effect.cache();

        let mut keys: PerStageKeys = [None; ShaderStage::COUNT];
        for stage in self.requested.stages() {
            let desc = Self::shader_desc(effect, pass, stage)?;
            keys[stage.index()] = Some(StageKey::of(&Self::request(effect, pass, desc)));
        }
        let program_key = ProgramKey(keys);

        if use_cache {
            if let Some(program) = cache.program(&program_key) {
                log::debug!("shader cache: program hit for `{}` pass `{}`", effect.name(), pass.name());
                for stage in self.requested.stages() {
                    self.stage_valid[stage] = true;
                }
                return Ok(program);
            }
        }

        let mut stages: PerStage<Option<CachedStage>> = PerStage::default();
        let mut first_error = None;
        for stage in self.requested.stages() {
            let desc = Self::shader_desc(effect, pass, stage)?;
            let request = Self::request(effect, pass, desc);
            let key = StageKey::of(&request);
            match Self::compile_stage(ctx, effect, &request, key, use_cache) {
                Ok(cached) => {
                    self.stage_valid[stage] = true;
                    stages[stage] = Some(cached);
                }
                Err(err) => {
                    log::error!(
                        "`{}` pass `{}`: {stage} entry `{}` ({}) failed: {err}",
                        effect.name(),
                        pass.name(),
                        desc.entry_point,
                        desc.profile
                    );
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let program_stages: Vec<ProgramStage<'_>> = stages
            .iter()
            .filter_map(|(stage, cached)| {
                cached.as_ref().map(|c| ProgramStage {
                    stage,
                    compiled: &c.compiled,
                    reflection: &c.reflection,
                })
            })
            .collect();
        let native = ctx.create_program(&program_stages)?;
        let program = Arc::new(LinkedProgram::new(stages, native)?);

        Ok(if use_cache {
            cache.insert_program(program_key, program)
        } else {
            program
        })
    }

    fn request<'a>(effect: &'a Effect, pass: &'a Pass, desc: &'a ShaderDesc) -> CompileRequest<'a> {
        CompileRequest {
            stage: desc.stage,
            source: effect.source(),
            entry_point: &desc.entry_point,
            profile: &desc.profile,
            macros: pass.macros(),
        }
    }

    fn compile_stage(
        ctx: &mut dyn RenderContext,
        effect: &Effect,
        request: &CompileRequest<'_>,
        key: StageKey,
        use_cache: bool,
    ) -> Result<CachedStage, GraphicsError> {
        if use_cache {
            if let Some(hit) = effect.cache().stage_for(key, request) {
                log::debug!("shader cache: {} `{}` hit", request.stage, request.entry_point);
                return Ok(hit);
            }
        }

        let compiler = ctx.compiler();
        let compiled = compiler.compile(request)?;
        let reflection = compiler.reflect(&compiled)?;
        reflection.validate()?;
        let cached = CachedStage {
            compiled: Arc::new(compiled),
            reflection: Arc::new(reflection),
        };

        Ok(if use_cache {
            effect.cache().insert_stage(key, cached)
        } else {
            cached
        })
    }

    fn slot_tables(program: &LinkedProgram) -> PerStage<ResourceSlotTable> {
        PerStage::from_fn(|stage| {
            program
                .stage(stage)
                .map(|cached| ResourceSlotTable::for_stage(&cached.reflection))
                .unwrap_or_default()
        })
    }

    /// Copy parameter values into native state and issue the binding calls.
    ///
    /// Does nothing unless the object is valid.
    pub fn bind(&mut self, ctx: &mut dyn RenderContext) {
        profile_scope!("shader_object_bind");

        let Some(program) = self.program.as_ref().filter(|_| self.is_valid()) else {
            log::trace!("shader object: bind skipped ({:?})", self.state);
            return;
        };

        for bind in &self.binds {
            bind.execute(&mut self.buffers, &mut self.slots);
        }
        self.buffers.flush(ctx);

        ctx.set_program(program.program());
        for (stage, _) in program.stages() {
            let cbuffers: Vec<Option<&GpuBuffer>> = program
                .stage_cbuffers(stage)
                .iter()
                .map(|index| index.and_then(|i| self.buffers.get(i)).map(ConstantBuffer::gpu_buffer))
                .collect();
            if !cbuffers.is_empty() {
                ctx.set_constant_buffers(stage, &cbuffers);
            }

            let slots = &self.slots[stage];
            if !slots.textures.is_empty() {
                ctx.set_textures(stage, &slots.textures);
            }
            if !slots.samplers.is_empty() {
                ctx.set_samplers(stage, &slots.samplers);
            }
            if !slots.buffers.is_empty() {
                ctx.set_buffers(stage, &slots.buffers);
            }
        }
    }

    /// Clear every slot this object uses.
    pub fn unbind(&mut self, ctx: &mut dyn RenderContext) {
        let Some(program) = self.program.as_ref().filter(|_| self.is_valid()) else {
            return;
        };

        for (stage, _) in program.stages() {
            let cbuffer_slots = program.stage_cbuffers(stage).len();
            if cbuffer_slots > 0 {
                ctx.set_constant_buffers(stage, &vec![None; cbuffer_slots]);
            }

            let slots = &mut self.slots[stage];
            slots.clear();
            if !slots.textures.is_empty() {
                ctx.set_textures(stage, &slots.textures);
            }
            if !slots.samplers.is_empty() {
                ctx.set_samplers(stage, &slots.samplers);
            }
            if !slots.buffers.is_empty() {
                ctx.set_buffers(stage, &slots.buffers);
            }
        }
    }

    /// Copy for another instance of the same effect.
    ///
    /// The linked program is shared; staging buffers, GPU buffers and the
    /// bind table are new and read `effect`'s parameters.
    pub fn clone_for(&self, ctx: &mut dyn RenderContext, effect: &Effect) -> Result<ShaderObject, GraphicsError> {
        let mut clone = ShaderObject {
            settings: self.settings.clone(),
            state: self.state,
            requested: self.requested,
            stage_valid: self.stage_valid.clone(),
            ..ShaderObject::default()
        };
        let Some(program) = self.program.as_ref().filter(|_| self.is_valid()) else {
            return Ok(clone);
        };

        clone.binds = build_bind_table(effect, program, self.settings.unresolved)?;
        clone.buffers = ConstantBufferStore::create(ctx, program.cbuffers())?;
        clone.slots = Self::slot_tables(program);
        clone.program = Some(program.clone());
        Ok(clone)
    }
}

static_assertions::assert_impl_all!(ShaderObject: Send);
