//! Parameter bind tables.
//!
//! When a shader object links, every variable and resource its stages use is
//! matched to an effect parameter by name and turned into a
//! [`ParameterBind`]. The kind of copy (scalar conversion, vector, matrix
//! transpose, strided array, resource handle) is chosen once here; `bind()`
//! only walks the table.
//!
//! Engine matrices are row-major, native constant buffers hold column-major
//! registers, so matrix binds write the transpose.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use klayge_core::profiling::profile_scope;

use crate::config::UnresolvedPolicy;
use crate::effect::parameter::{EffectParameter, ParameterType};
use crate::effect::Effect;
use crate::error::GraphicsError;
use crate::types::{PerStage, ScalarType, ShaderStage};

use super::cache::LinkedProgram;
use super::reflection::{ReflectedResourceSlot, ReflectedVariable, ResourceKind, REGISTER_SIZE};
use super::slots::ResourceSlotTable;
use super::staging::{ConstantBuffer, ConstantBufferStore};

/// Lanes in an engine matrix row.
const MATRIX_ROW_LANES: u32 = 4;

/// Copy of one array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementOp {
    Scalar {
        src: ScalarType,
        dst: ScalarType,
    },
    Vector {
        components: u32,
        src: ScalarType,
        dst: ScalarType,
    },
    Matrix {
        columns: u32,
        rows: u32,
    },
}

impl ElementOp {
    /// Source lanes consumed per element.
    pub fn source_lanes(self) -> usize {
        match self {
            Self::Scalar { .. } => 1,
            Self::Vector { components, .. } => components as usize,
            Self::Matrix { .. } => ParameterType::Float4x4.components() as usize,
        }
    }

    fn write(self, cb: &mut ConstantBuffer, offset: u32, lanes: &[u32]) {
        match self {
            Self::Scalar { src, dst } => {
                if let Some(&lane) = lanes.first() {
                    cb.write_lane(offset, src.convert(lane, dst));
                }
            }
            Self::Vector {
                components,
                src,
                dst,
            } => {
                for (i, &lane) in lanes.iter().take(components as usize).enumerate() {
                    cb.write_lane(offset + i as u32 * ScalarType::SIZE, src.convert(lane, dst));
                }
            }
            Self::Matrix { columns, rows } => {
                for column in 0..columns {
                    for row in 0..rows {
                        let Some(&lane) = lanes.get((row * MATRIX_ROW_LANES + column) as usize) else {
                            continue;
                        };
                        cb.write_lane(
                            offset + column * REGISTER_SIZE + row * ScalarType::SIZE,
                            lane,
                        );
                    }
                }
            }
        }
    }

    fn into_op(self, cbuffer: usize, offset: u32) -> BindOp {
        match self {
            Self::Scalar { src, dst } => BindOp::ScalarCopy {
                cbuffer,
                offset,
                src,
                dst,
            },
            Self::Vector {
                components,
                src,
                dst,
            } => BindOp::VectorPad {
                cbuffer,
                offset,
                components,
                src,
                dst,
            },
            Self::Matrix { columns, rows } => BindOp::MatrixTranspose {
                cbuffer,
                offset,
                columns,
                rows,
            },
        }
    }
}

/// Where a resource bind writes.
#[derive(Debug, Clone)]
pub enum ResourceTarget {
    Texture,
    Sampler,
    Buffer,
    /// Texture into `textures[slot]`, the paired sampler into `samplers[slot]`.
    CombinedTextureSampler { sampler: Weak<EffectParameter> },
}

/// One precomputed copy from a parameter into native state.
#[derive(Debug, Clone)]
pub enum BindOp {
    /// One converted lane.
    ScalarCopy {
        cbuffer: usize,
        offset: u32,
        src: ScalarType,
        dst: ScalarType,
    },
    /// The logical components of a vector; padding lanes are left alone.
    VectorPad {
        cbuffer: usize,
        offset: u32,
        components: u32,
        src: ScalarType,
        dst: ScalarType,
    },
    /// `columns` registers of `rows` floats, transposed from row-major.
    MatrixTranspose {
        cbuffer: usize,
        offset: u32,
        columns: u32,
        rows: u32,
    },
    /// Up to `elements` copies of `element`, `stride` bytes apart.
    ArrayStride {
        cbuffer: usize,
        offset: u32,
        stride: u32,
        elements: u32,
        element: ElementOp,
    },
    /// A resource handle into a stage's slot table.
    ResourceAssign {
        stage: ShaderStage,
        slot: u32,
        target: ResourceTarget,
    },
}

impl BindOp {
    /// Constant buffer written by this op, `None` for resources.
    pub fn cbuffer(&self) -> Option<usize> {
        match self {
            Self::ScalarCopy { cbuffer, .. }
            | Self::VectorPad { cbuffer, .. }
            | Self::MatrixTranspose { cbuffer, .. }
            | Self::ArrayStride { cbuffer, .. } => Some(*cbuffer),
            Self::ResourceAssign { .. } => None,
        }
    }
}

/// A bind of one parameter.
///
/// Holds the parameter weakly; a bind whose parameter is gone writes
/// nothing.
#[derive(Debug, Clone)]
pub struct ParameterBind {
    param: Weak<EffectParameter>,
    name: String,
    op: BindOp,
}

impl ParameterBind {
    pub fn new(param: &Arc<EffectParameter>, op: BindOp) -> Self {
        Self {
            param: Arc::downgrade(param),
            name: param.name().to_string(),
            op,
        }
    }

    /// Name of the bound parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &BindOp {
        &self.op
    }

    /// Copy the parameter's current value into staging or slot state.
    ///
    /// Variable binds always mark their buffer dirty.
    pub fn execute(&self, buffers: &mut ConstantBufferStore, slots: &mut PerStage<ResourceSlotTable>) {
        if let BindOp::ResourceAssign {
            stage,
            slot,
            target,
        } = &self.op
        {
            let Some(param) = self.param.upgrade() else { return };
            assign_resource(&param, &mut slots[*stage], *slot as usize, target);
            return;
        }

        let Some(cb) = self.op.cbuffer().and_then(|index| buffers.get_mut(index)) else {
            return;
        };
        cb.mark_dirty();
        let Some(param) = self.param.upgrade() else { return };
        param.with_lanes(|lanes| match self.op {
            BindOp::ScalarCopy {
                offset, src, dst, ..
            } => ElementOp::Scalar { src, dst }.write(cb, offset, lanes),
            BindOp::VectorPad {
                offset,
                components,
                src,
                dst,
                ..
            } => ElementOp::Vector {
                components,
                src,
                dst,
            }
            .write(cb, offset, lanes),
            BindOp::MatrixTranspose {
                offset,
                columns,
                rows,
                ..
            } => ElementOp::Matrix { columns, rows }.write(cb, offset, lanes),
            BindOp::ArrayStride {
                offset,
                stride,
                elements,
                element,
                ..
            } => {
                let chunks = lanes.chunks_exact(element.source_lanes());
                for (i, chunk) in chunks.take(elements as usize).enumerate() {
                    element.write(cb, offset + i as u32 * stride, chunk);
                }
            }
            BindOp::ResourceAssign { .. } => {}
        });
    }
}

fn assign_resource(
    param: &EffectParameter,
    table: &mut ResourceSlotTable,
    slot: usize,
    target: &ResourceTarget,
) {
    match target {
        ResourceTarget::Texture => {
            if let Some(entry) = table.textures.get_mut(slot) {
                *entry = param.texture();
            }
        }
        ResourceTarget::Sampler => {
            if let Some(entry) = table.samplers.get_mut(slot) {
                *entry = param.sampler();
            }
        }
        ResourceTarget::Buffer => {
            if let Some(entry) = table.buffers.get_mut(slot) {
                *entry = param.buffer();
            }
        }
        ResourceTarget::CombinedTextureSampler { sampler } => {
            if let Some(entry) = table.textures.get_mut(slot) {
                *entry = param.texture();
            }
            if let Some(entry) = table.samplers.get_mut(slot) {
                *entry = sampler.upgrade().and_then(|s| s.sampler());
            }
        }
    }
}

fn describe_parameter(param: &EffectParameter) -> String {
    match param.array_size() {
        Some(n) => format!("{:?}[{n}]", param.parameter_type()),
        None => format!("{:?}", param.parameter_type()),
    }
}

fn describe_variable(var: &ReflectedVariable) -> String {
    let shape = if var.is_matrix() {
        format!("{:?}{}x{}", var.scalar, var.columns, var.rows)
    } else if var.columns > 1 {
        format!("{:?}{}", var.scalar, var.columns)
    } else {
        format!("{:?}", var.scalar)
    };
    match var.elements {
        0 => shape,
        n => format!("{shape}[{n}]"),
    }
}

/// Choose the copy for `param` into the native variable `var`.
pub fn variable_op(
    param: &EffectParameter,
    var: &ReflectedVariable,
    cbuffer: usize,
) -> Result<BindOp, GraphicsError> {
    let ty = param.parameter_type();
    let mismatch = || GraphicsError::TypeMismatch {
        name: var.name.clone(),
        expected: describe_variable(var),
        found: describe_parameter(param),
    };

    let src = ty.scalar_type().ok_or_else(mismatch)?;
    let element = if ty.is_matrix() {
        if !var.is_matrix() {
            return Err(mismatch());
        }
        ElementOp::Matrix {
            columns: var.columns,
            rows: var.rows,
        }
    } else {
        let components = ty.components();
        if var.is_matrix() || components > var.columns {
            return Err(mismatch());
        }
        if components == 1 {
            ElementOp::Scalar {
                src,
                dst: var.scalar,
            }
        } else {
            ElementOp::Vector {
                components,
                src,
                dst: var.scalar,
            }
        }
    };

    match (param.is_array(), var.elements) {
        (false, 0) => Ok(element.into_op(cbuffer, var.offset)),
        (true, elements) if elements > 0 => Ok(BindOp::ArrayStride {
            cbuffer,
            offset: var.offset,
            stride: var.array_stride,
            elements,
            element,
        }),
        _ => Err(mismatch()),
    }
}

fn resource_target(
    param: &EffectParameter,
    resource: &ReflectedResourceSlot,
) -> Result<ResourceTarget, GraphicsError> {
    let target = match (resource.kind, param.parameter_type()) {
        (ResourceKind::Texture(slot), ParameterType::Texture(dim)) if slot == dim => {
            Some(ResourceTarget::Texture)
        }
        (ResourceKind::Sampler, ParameterType::Sampler) => Some(ResourceTarget::Sampler),
        (ResourceKind::Buffer, ParameterType::Buffer) => Some(ResourceTarget::Buffer),
        (ResourceKind::CombinedTextureSampler(slot), ParameterType::Texture(dim)) if slot == dim => {
            Some(ResourceTarget::CombinedTextureSampler {
                sampler: Weak::new(),
            })
        }
        _ => None,
    };
    target.ok_or_else(|| GraphicsError::TypeMismatch {
        name: resource.name.clone(),
        expected: format!("{:?}", resource.kind),
        found: describe_parameter(param),
    })
}

fn unresolved(policy: UnresolvedPolicy, name: &str, stage: ShaderStage) -> Result<(), GraphicsError> {
    match policy {
        UnresolvedPolicy::Error => Err(GraphicsError::UnresolvedParameter {
            name: name.to_string(),
            stage,
        }),
        UnresolvedPolicy::Skip => {
            log::warn!("{stage} shader uses `{name}`, which no effect parameter provides; leaving it unbound");
            Ok(())
        }
    }
}

/// Build the bind table of `program` against the parameters of `effect`.
///
/// Variables of buffers shared between stages are bound once.
pub fn build_bind_table(
    effect: &Effect,
    program: &LinkedProgram,
    policy: UnresolvedPolicy,
) -> Result<Vec<ParameterBind>, GraphicsError> {
    profile_scope!("build_bind_table");

    let mut binds = Vec::new();
    let mut bound_variables: HashSet<(usize, &str)> = HashSet::new();
    let mut variable_count = 0;

    for (stage, cached) in program.stages() {
        let reflection = &cached.reflection;

        for cb in &reflection.constant_buffers {
            let index = program.cbuffer_index(&cb.name).ok_or_else(|| {
                GraphicsError::Internal(format!("constant buffer `{}` missing from program", cb.name))
            })?;
            for var in &cb.variables {
                if !bound_variables.insert((index, var.name.as_str())) {
                    continue;
                }
                let Some(param) = effect.parameter_by_name(&var.name) else {
                    unresolved(policy, &var.name, stage)?;
                    continue;
                };
                binds.push(ParameterBind::new(param, variable_op(param, var, index)?));
                variable_count += 1;
            }
        }

        for resource in &reflection.resources {
            let slot = resource.slot;
            if let Some(param) = effect.parameter_by_name(&resource.name) {
                let target = resource_target(param, resource)?;
                binds.push(ParameterBind::new(
                    param,
                    BindOp::ResourceAssign {
                        stage,
                        slot,
                        target,
                    },
                ));
                continue;
            }

            let combined = effect
                .combined_sampler(&resource.name)
                .filter(|c| c.stages.contains(stage.flag()));
            let Some(combined) = combined else {
                unresolved(policy, &resource.name, stage)?;
                continue;
            };
            let (param, target) = match resource.kind {
                ResourceKind::CombinedTextureSampler(_) => {
                    resource_target(&combined.texture, resource)?;
                    (
                        &combined.texture,
                        ResourceTarget::CombinedTextureSampler {
                            sampler: Arc::downgrade(&combined.sampler),
                        },
                    )
                }
                ResourceKind::Texture(_) => {
                    (&combined.texture, resource_target(&combined.texture, resource)?)
                }
                ResourceKind::Sampler => (&combined.sampler, ResourceTarget::Sampler),
                ResourceKind::Buffer => {
                    return Err(GraphicsError::TypeMismatch {
                        name: resource.name.clone(),
                        expected: "Buffer".to_string(),
                        found: "combined texture/sampler".to_string(),
                    });
                }
            };
            binds.push(ParameterBind::new(
                param,
                BindOp::ResourceAssign {
                    stage,
                    slot,
                    target,
                },
            ));
        }
    }

    log::debug!(
        "bind table for `{}`: {} binds ({variable_count} variables)",
        effect.name(),
        binds.len()
    );
    Ok(binds)
}
