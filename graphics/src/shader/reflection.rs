//! Backend-agnostic shader reflection.
//!
//! A [`StageReflection`] lists the constant buffers and resource slots one
//! compiled stage actually uses. [`reflect_module`] produces it from naga
//! IR; other compilers may build it by hand.

use serde::{Deserialize, Serialize};

use crate::effect::codegen::{BUFFER_SET, CBUFFER_SET, SAMPLER_SET, TEXTURE_SET};
use crate::error::GraphicsError;
use crate::types::{ScalarType, ShaderStage, TextureDimension};

/// Size of one constant-buffer register.
pub const REGISTER_SIZE: u32 = 16;

/// Slots per class (and constant-buffer slots) a stage may use.
pub const MAX_SLOTS: u32 = 128;

/// Largest constant buffer: 4096 registers.
pub const MAX_CBUFFER_SIZE: u32 = 4096 * REGISTER_SIZE;

/// A variable inside a constant buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectedVariable {
    pub name: String,
    /// Index of the containing buffer in [`StageReflection::constant_buffers`].
    pub cbuffer: usize,
    /// Byte offset within the buffer.
    pub offset: u32,
    pub scalar: ScalarType,
    /// Lanes per register (1 for scalars and vectors).
    pub rows: u32,
    /// Registers for matrices, components for vectors, 1 for scalars.
    pub columns: u32,
    /// Array element count, 0 when not an array.
    pub elements: u32,
    /// Byte stride between array elements.
    pub array_stride: u32,
}

impl ReflectedVariable {
    /// Describe a scalar at `offset`.
    pub fn scalar(name: impl Into<String>, cbuffer: usize, offset: u32, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            cbuffer,
            offset,
            scalar,
            rows: 1,
            columns: 1,
            elements: 0,
            array_stride: 0,
        }
    }

    /// Describe a vector of `components` at `offset`.
    pub fn vector(
        name: impl Into<String>,
        cbuffer: usize,
        offset: u32,
        scalar: ScalarType,
        components: u32,
    ) -> Self {
        Self {
            columns: components,
            ..Self::scalar(name, cbuffer, offset, scalar)
        }
    }

    /// Describe a column-major float matrix of `columns` registers of `rows` lanes.
    pub fn matrix(name: impl Into<String>, cbuffer: usize, offset: u32, columns: u32, rows: u32) -> Self {
        Self {
            rows,
            columns,
            ..Self::scalar(name, cbuffer, offset, ScalarType::Float)
        }
    }

    /// Turn into an array of `elements` with a register stride.
    pub fn into_array(mut self, elements: u32) -> Self {
        self.elements = elements;
        self.array_stride = self.element_size().div_ceil(REGISTER_SIZE).saturating_mul(REGISTER_SIZE);
        self
    }

    /// Whether the variable is a matrix.
    pub fn is_matrix(&self) -> bool {
        self.rows > 1
    }

    /// Bytes covered by one element.
    pub fn element_size(&self) -> u32 {
        self.checked_element_size().unwrap_or(u32::MAX)
    }

    /// Bytes covered by the whole variable.
    pub fn size(&self) -> u32 {
        self.checked_size().unwrap_or(u32::MAX)
    }

    fn checked_element_size(&self) -> Option<u32> {
        if self.is_matrix() {
            self.columns
                .checked_sub(1)?
                .checked_mul(REGISTER_SIZE)?
                .checked_add(self.rows.checked_mul(ScalarType::SIZE)?)
        } else {
            self.columns.checked_mul(ScalarType::SIZE)
        }
    }

    fn checked_size(&self) -> Option<u32> {
        let element = self.checked_element_size()?;
        match self.elements {
            0 => Some(element),
            n => (n - 1).checked_mul(self.array_stride)?.checked_add(element),
        }
    }

    /// Check shape and stride; `Err` carries the reason.
    fn check_shape(&self) -> Result<(), String> {
        if !(1..=4).contains(&self.rows) || !(1..=4).contains(&self.columns) {
            return Err(format!("has a {}x{} shape", self.rows, self.columns));
        }
        if self.elements > 0 && self.array_stride < self.element_size() {
            return Err(format!(
                "has array stride {} below its element size {}",
                self.array_stride,
                self.element_size()
            ));
        }
        Ok(())
    }
}

/// A constant buffer used by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectedConstantBuffer {
    pub name: String,
    pub slot: u32,
    /// Total size in bytes, a multiple of 16.
    pub size: u32,
    pub variables: Vec<ReflectedVariable>,
}

/// Kind of a resource slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Texture(TextureDimension),
    Sampler,
    Buffer,
    /// A texture unit that also carries its sampler (GL-style backends).
    CombinedTextureSampler(TextureDimension),
}

/// Slot namespace a resource kind occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotClass {
    Texture,
    Sampler,
    Buffer,
}

impl ResourceKind {
    /// Namespace in which the slot index must be unique.
    pub fn slot_class(self) -> SlotClass {
        match self {
            Self::Texture(_) | Self::CombinedTextureSampler(_) => SlotClass::Texture,
            Self::Sampler => SlotClass::Sampler,
            Self::Buffer => SlotClass::Buffer,
        }
    }
}

/// A bound resource used by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectedResourceSlot {
    pub name: String,
    pub slot: u32,
    pub kind: ResourceKind,
}

impl ReflectedResourceSlot {
    pub fn new(name: impl Into<String>, slot: u32, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            slot,
            kind,
        }
    }
}

/// Everything one compiled stage reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReflection {
    pub stage: ShaderStage,
    pub constant_buffers: Vec<ReflectedConstantBuffer>,
    pub resources: Vec<ReflectedResourceSlot>,
}

impl StageReflection {
    /// Empty reflection for `stage`.
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            constant_buffers: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Append a constant buffer built from `(variable)` descriptions; the
    /// variables' buffer index is fixed up. Size is rounded up to 16.
    pub fn with_constant_buffer(
        mut self,
        name: impl Into<String>,
        slot: u32,
        size: u32,
        variables: Vec<ReflectedVariable>,
    ) -> Self {
        let index = self.constant_buffers.len();
        let variables = variables
            .into_iter()
            .map(|mut v| {
                v.cbuffer = index;
                v
            })
            .collect();
        self.constant_buffers.push(ReflectedConstantBuffer {
            name: name.into(),
            slot,
            size: size.div_ceil(REGISTER_SIZE) * REGISTER_SIZE,
            variables,
        });
        self
    }

    /// Append a resource slot.
    pub fn with_resource(mut self, slot: ReflectedResourceSlot) -> Self {
        self.resources.push(slot);
        self
    }

    /// Highest used slot + 1 for a slot class (0 when unused).
    pub fn slot_count(&self, class: SlotClass) -> usize {
        self.resources
            .iter()
            .filter(|r| r.kind.slot_class() == class)
            .map(|r| r.slot as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Highest used constant-buffer slot + 1.
    pub fn cbuffer_slot_count(&self) -> usize {
        self.constant_buffers
            .iter()
            .map(|cb| cb.slot as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Check layout and slot invariants.
    ///
    /// Reflection may come from a deserialized snapshot, so every bound is
    /// checked without arithmetic that can overflow.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        let mut cbuffer_slots = std::collections::HashSet::new();
        for (index, cb) in self.constant_buffers.iter().enumerate() {
            if cb.slot >= MAX_SLOTS {
                return Err(GraphicsError::ReflectionFailed(format!(
                    "{} stage binds constant buffer `{}` to slot {} (limit {MAX_SLOTS})",
                    self.stage, cb.name, cb.slot
                )));
            }
            if cb.size > MAX_CBUFFER_SIZE {
                return Err(GraphicsError::ReflectionFailed(format!(
                    "constant buffer `{}` is {} bytes (limit {MAX_CBUFFER_SIZE})",
                    cb.name, cb.size
                )));
            }
            if !cbuffer_slots.insert(cb.slot) {
                return Err(GraphicsError::ReflectionFailed(format!(
                    "{} stage binds two constant buffers to slot {}",
                    self.stage, cb.slot
                )));
            }
            for var in &cb.variables {
                if var.cbuffer != index {
                    return Err(GraphicsError::ReflectionFailed(format!(
                        "variable `{}` points at buffer {} but lives in `{}`",
                        var.name, var.cbuffer, cb.name
                    )));
                }
                var.check_shape().map_err(|reason| {
                    GraphicsError::ReflectionFailed(format!("variable `{}` {reason}", var.name))
                })?;
                let end = var.checked_size().and_then(|size| var.offset.checked_add(size));
                if !matches!(end, Some(end) if end <= cb.size) {
                    return Err(GraphicsError::ReflectionFailed(format!(
                        "variable `{}` ({} bytes at {}) overruns `{}` ({} bytes)",
                        var.name,
                        var.size(),
                        var.offset,
                        cb.name,
                        cb.size
                    )));
                }
            }
        }

        let mut slots = std::collections::HashSet::new();
        for resource in &self.resources {
            if resource.slot >= MAX_SLOTS {
                return Err(GraphicsError::ReflectionFailed(format!(
                    "{} stage binds resource `{}` to slot {} (limit {MAX_SLOTS})",
                    self.stage, resource.name, resource.slot
                )));
            }
            if !slots.insert((resource.kind.slot_class(), resource.slot)) {
                return Err(GraphicsError::ReflectionFailed(format!(
                    "{} stage binds two resources to {:?} slot {}",
                    self.stage,
                    resource.kind.slot_class(),
                    resource.slot
                )));
            }
        }
        Ok(())
    }
}

fn scalar_type(scalar: naga::Scalar, name: &str) -> Result<ScalarType, GraphicsError> {
    match (scalar.kind, scalar.width) {
        (naga::ScalarKind::Bool, _) => Ok(ScalarType::Bool),
        (naga::ScalarKind::Uint, 4) => Ok(ScalarType::UInt),
        (naga::ScalarKind::Sint, 4) => Ok(ScalarType::Int),
        (naga::ScalarKind::Float, 4) => Ok(ScalarType::Float),
        (kind, width) => Err(GraphicsError::ReflectionFailed(format!(
            "`{name}` has unsupported scalar {kind:?} of width {width}"
        ))),
    }
}

fn reflect_variable(
    module: &naga::Module,
    name: &str,
    cbuffer: usize,
    offset: u32,
    ty: naga::Handle<naga::Type>,
) -> Result<ReflectedVariable, GraphicsError> {
    match &module.types[ty].inner {
        naga::TypeInner::Scalar(scalar) => Ok(ReflectedVariable::scalar(
            name,
            cbuffer,
            offset,
            scalar_type(*scalar, name)?,
        )),
        naga::TypeInner::Vector { size, scalar } => Ok(ReflectedVariable::vector(
            name,
            cbuffer,
            offset,
            scalar_type(*scalar, name)?,
            *size as u32,
        )),
        naga::TypeInner::Matrix { columns, rows, .. } => Ok(ReflectedVariable::matrix(
            name,
            cbuffer,
            offset,
            *columns as u32,
            *rows as u32,
        )),
        naga::TypeInner::Array { base, size, stride } => {
            let elements = match size {
                naga::ArraySize::Constant(n) => n.get(),
                _ => {
                    return Err(GraphicsError::ReflectionFailed(format!(
                        "`{name}` is a runtime-sized array inside a constant buffer"
                    )))
                }
            };
            let element = reflect_variable(module, name, cbuffer, offset, *base)?;
            if element.elements != 0 {
                return Err(GraphicsError::ReflectionFailed(format!(
                    "`{name}` is a nested array"
                )));
            }
            Ok(ReflectedVariable {
                elements,
                array_stride: *stride,
                ..element
            })
        }
        other => Err(GraphicsError::ReflectionFailed(format!(
            "`{name}` has unsupported constant-buffer type {other:?}"
        ))),
    }
}

fn texture_dimension(dim: naga::ImageDimension, arrayed: bool) -> TextureDimension {
    match (dim, arrayed) {
        (naga::ImageDimension::D1, false) => TextureDimension::D1,
        (naga::ImageDimension::D1, true) => TextureDimension::D1Array,
        (naga::ImageDimension::D2, false) => TextureDimension::D2,
        (naga::ImageDimension::D2, true) => TextureDimension::D2Array,
        (naga::ImageDimension::D3, _) => TextureDimension::D3,
        (naga::ImageDimension::Cube, false) => TextureDimension::Cube,
        (naga::ImageDimension::Cube, true) => TextureDimension::CubeArray,
    }
}

/// Reflect the globals used by `entry_point` of a validated naga module.
///
/// Globals the entry point never touches are skipped, as are globals
/// without a resource binding.
pub fn reflect_module(
    stage: ShaderStage,
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
    entry_point: &str,
) -> Result<StageReflection, GraphicsError> {
    let index = module
        .entry_points
        .iter()
        .position(|ep| ep.name == entry_point)
        .ok_or_else(|| {
            GraphicsError::ReflectionFailed(format!("entry point `{entry_point}` not found"))
        })?;
    let usage = info.get_entry_point(index);
    let gctx = module.to_ctx();

    let mut reflection = StageReflection::new(stage);
    for (handle, var) in module.global_variables.iter() {
        if usage[handle].is_empty() {
            continue;
        }
        let Some(binding) = &var.binding else {
            continue;
        };
        let ty = &module.types[var.ty];
        // Interface blocks are named by their block (type) name.
        let block_name = || {
            ty.name
                .clone()
                .or_else(|| var.name.clone())
                .unwrap_or_default()
        };

        match var.space {
            naga::AddressSpace::Uniform => {
                if binding.group != CBUFFER_SET {
                    log::debug!(
                        "{stage} uniform `{}` is in set {}, treating binding {} as a cbuffer slot",
                        block_name(),
                        binding.group,
                        binding.binding
                    );
                }
                let cbuffer = reflection.constant_buffers.len();
                let name = block_name();
                let variables = match &ty.inner {
                    naga::TypeInner::Struct { members, .. } => members
                        .iter()
                        .filter_map(|m| m.name.as_deref().map(|n| (n, m)))
                        .map(|(n, m)| reflect_variable(module, n, cbuffer, m.offset, m.ty))
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => vec![reflect_variable(module, &name, cbuffer, 0, var.ty)?],
                };
                let size = ty.inner.size(gctx).div_ceil(REGISTER_SIZE) * REGISTER_SIZE;
                reflection.constant_buffers.push(ReflectedConstantBuffer {
                    name,
                    slot: binding.binding,
                    size,
                    variables,
                });
            }
            naga::AddressSpace::Storage { .. } => {
                if binding.group != BUFFER_SET {
                    log::debug!("{stage} storage `{}` is in set {}", block_name(), binding.group);
                }
                reflection.resources.push(ReflectedResourceSlot::new(
                    block_name(),
                    binding.binding,
                    ResourceKind::Buffer,
                ));
            }
            naga::AddressSpace::Handle => {
                let name = var.name.clone().unwrap_or_default();
                let kind = match &ty.inner {
                    naga::TypeInner::Image { dim, arrayed, .. } => {
                        if binding.group != TEXTURE_SET {
                            log::debug!("{stage} texture `{name}` is in set {}", binding.group);
                        }
                        ResourceKind::Texture(texture_dimension(*dim, *arrayed))
                    }
                    naga::TypeInner::Sampler { .. } => {
                        if binding.group != SAMPLER_SET {
                            log::debug!("{stage} sampler `{name}` is in set {}", binding.group);
                        }
                        ResourceKind::Sampler
                    }
                    other => {
                        return Err(GraphicsError::ReflectionFailed(format!(
                            "handle `{name}` has unsupported type {other:?}"
                        )))
                    }
                };
                reflection
                    .resources
                    .push(ReflectedResourceSlot::new(name, binding.binding, kind));
            }
            _ => {}
        }
    }

    reflection.validate()?;
    Ok(reflection)
}
