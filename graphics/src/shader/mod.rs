//! Shader compilation, reflection and parameter binding.
//!
//! # Overview
//!
//! - [`ShaderCompiler`] - compiles one stage of an effect and reflects it
//! - [`StageReflection`] - constant buffers and resource slots a stage uses
//! - [`ShaderCache`] - stage and program memoization per effect
//! - [`ShaderObject`] - one compiled pass with its bind table, staging
//!   buffers and slot tables
//!
//! # Example
//!
//! ```ignore
//! use klayge_graphics::{DummyContext, Effect, ShaderObject, ShaderSettings};
//!
//! let effect = Effect::from_ron(&std::fs::read_to_string("tonemap.ron")?)?;
//! let mut ctx = DummyContext::new();
//! let mut object = ShaderObject::new(ShaderSettings::default());
//! object.set_shader(&mut ctx, &effect, "Tonemap", 0)?;
//! object.bind(&mut ctx);
//! ```

pub mod bind;
pub mod cache;
pub mod compiler;
pub mod object;
pub mod reflection;
pub mod slots;
pub mod staging;

pub use bind::{BindOp, ElementOp, ParameterBind, ResourceTarget};
pub use cache::{CacheSnapshot, CacheStats, CachedStage, LinkedProgram, ProgramCBuffer, ShaderCache, StageKey};
pub use compiler::{CompileRequest, CompiledStage, NagaCompiler, ShaderCompiler};
pub use object::{ShaderObject, ShaderObjectState};
pub use reflection::{
    ReflectedConstantBuffer, ReflectedResourceSlot, ReflectedVariable, ResourceKind, SlotClass,
    StageReflection,
};
pub use slots::ResourceSlotTable;
pub use staging::{ConstantBuffer, ConstantBufferStore};
