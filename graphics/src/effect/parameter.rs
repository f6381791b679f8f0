//! Effect parameters: the engine-side values shaders read.
//!
//! An [`EffectParameter`] has a name, a [`ParameterType`], an optional array
//! size and a current value. Numeric values are stored as 32-bit lanes in
//! the parameter's own scalar kind (bools as 0/1, matrices as 16 row-major
//! floats); the bind table converts them to whatever the compiled shader
//! declares.

use std::sync::Arc;

use klayge_core::math::{Float4x4, IVec2, IVec3, IVec4, UVec2, UVec3, UVec4, Vec2, Vec3, Vec4};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::GraphicsError;
use crate::resources::{Buffer, Sampler, Texture};
use crate::types::{ScalarType, TextureDimension};

/// Semantic type of an effect parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    Bool,
    UInt,
    Int,
    Float,
    UInt2,
    UInt3,
    UInt4,
    Int2,
    Int3,
    Int4,
    Float2,
    Float3,
    Float4,
    Float4x4,
    Texture(TextureDimension),
    Sampler,
    Buffer,
}

impl ParameterType {
    /// Scalar kind of a numeric type, `None` for resources.
    pub fn scalar_type(self) -> Option<ScalarType> {
        use ParameterType::*;
        match self {
            Bool => Some(ScalarType::Bool),
            UInt | UInt2 | UInt3 | UInt4 => Some(ScalarType::UInt),
            Int | Int2 | Int3 | Int4 => Some(ScalarType::Int),
            Float | Float2 | Float3 | Float4 | Float4x4 => Some(ScalarType::Float),
            Texture(_) | Sampler | Buffer => None,
        }
    }

    /// Number of 32-bit lanes in one element (0 for resources).
    pub fn components(self) -> u32 {
        use ParameterType::*;
        match self {
            Bool | UInt | Int | Float => 1,
            UInt2 | Int2 | Float2 => 2,
            UInt3 | Int3 | Float3 => 3,
            UInt4 | Int4 | Float4 => 4,
            Float4x4 => 16,
            Texture(_) | Sampler | Buffer => 0,
        }
    }

    /// Whether this is the 4x4 matrix type.
    pub fn is_matrix(self) -> bool {
        self == Self::Float4x4
    }

    /// Whether values of this type are resource handles.
    pub fn is_resource(self) -> bool {
        self.scalar_type().is_none()
    }
}

/// Current value of a parameter.
#[derive(Debug, Clone)]
pub enum ParameterValue {
    /// Raw lanes in the parameter's scalar kind, element after element.
    Numeric(Vec<u32>),
    /// A texture, or none bound.
    Texture(Option<Arc<Texture>>),
    /// A sampler, or none bound.
    Sampler(Option<Arc<Sampler>>),
    /// A structured/raw buffer, or none bound.
    Buffer(Option<Arc<Buffer>>),
}

impl ParameterValue {
    /// The zero value for a parameter of `ty` with `count` elements.
    pub fn zeroed(ty: ParameterType, count: u32) -> Self {
        match ty {
            ParameterType::Texture(_) => Self::Texture(None),
            ParameterType::Sampler => Self::Sampler(None),
            ParameterType::Buffer => Self::Buffer(None),
            _ => Self::Numeric(vec![0; (ty.components() * count) as usize]),
        }
    }
}

/// Rust values that can be stored in a numeric parameter.
pub trait ParameterData: Sized {
    /// Parameter type these values belong to.
    const TYPE: ParameterType;

    /// Append this value's lanes.
    fn write_lanes(&self, out: &mut Vec<u32>);

    /// Read a value from exactly `TYPE.components()` lanes.
    fn read_lanes(lanes: &[u32]) -> Self;
}

impl ParameterData for bool {
    const TYPE: ParameterType = ParameterType::Bool;

    fn write_lanes(&self, out: &mut Vec<u32>) {
        out.push(u32::from(*self));
    }

    fn read_lanes(lanes: &[u32]) -> Self {
        lanes[0] != 0
    }
}

impl ParameterData for u32 {
    const TYPE: ParameterType = ParameterType::UInt;

    fn write_lanes(&self, out: &mut Vec<u32>) {
        out.push(*self);
    }

    fn read_lanes(lanes: &[u32]) -> Self {
        lanes[0]
    }
}

impl ParameterData for i32 {
    const TYPE: ParameterType = ParameterType::Int;

    fn write_lanes(&self, out: &mut Vec<u32>) {
        out.push(*self as u32);
    }

    fn read_lanes(lanes: &[u32]) -> Self {
        lanes[0] as i32
    }
}

impl ParameterData for f32 {
    const TYPE: ParameterType = ParameterType::Float;

    fn write_lanes(&self, out: &mut Vec<u32>) {
        out.push(self.to_bits());
    }

    fn read_lanes(lanes: &[u32]) -> Self {
        f32::from_bits(lanes[0])
    }
}

macro_rules! impl_vector_data {
    ($ty:ty, $param:ident, $n:expr, $scalar:ty, $to:expr, $from:expr) => {
        impl ParameterData for $ty {
            const TYPE: ParameterType = ParameterType::$param;

            fn write_lanes(&self, out: &mut Vec<u32>) {
                let values: [$scalar; $n] = self.to_array();
                out.extend(values.iter().map($to));
            }

            fn read_lanes(lanes: &[u32]) -> Self {
                let mut values = [<$scalar>::default(); $n];
                for (value, lane) in values.iter_mut().zip(lanes) {
                    *value = $from(*lane);
                }
                <$ty>::from_array(values)
            }
        }
    };
}

impl_vector_data!(UVec2, UInt2, 2, u32, |v: &u32| *v, |l: u32| l);
impl_vector_data!(UVec3, UInt3, 3, u32, |v: &u32| *v, |l: u32| l);
impl_vector_data!(UVec4, UInt4, 4, u32, |v: &u32| *v, |l: u32| l);
impl_vector_data!(IVec2, Int2, 2, i32, |v: &i32| *v as u32, |l: u32| l as i32);
impl_vector_data!(IVec3, Int3, 3, i32, |v: &i32| *v as u32, |l: u32| l as i32);
impl_vector_data!(IVec4, Int4, 4, i32, |v: &i32| *v as u32, |l: u32| l as i32);
impl_vector_data!(Vec2, Float2, 2, f32, |v: &f32| v.to_bits(), f32::from_bits);
impl_vector_data!(Vec3, Float3, 3, f32, |v: &f32| v.to_bits(), f32::from_bits);
impl_vector_data!(Vec4, Float4, 4, f32, |v: &f32| v.to_bits(), f32::from_bits);

impl ParameterData for Float4x4 {
    const TYPE: ParameterType = ParameterType::Float4x4;

    fn write_lanes(&self, out: &mut Vec<u32>) {
        out.extend(self.to_row_major_array().iter().map(|v| v.to_bits()));
    }

    fn read_lanes(lanes: &[u32]) -> Self {
        let mut values = [0.0; 16];
        for (value, lane) in values.iter_mut().zip(lanes) {
            *value = f32::from_bits(*lane);
        }
        Float4x4::from_row_major_slice(&values)
    }
}

/// A named, typed value owned by an effect.
///
/// Values may be set from any thread; shader objects read them when they
/// bind.
///
/// ```ignore
/// let exposure = effect.parameter_by_name("exposure").unwrap();
/// exposure.set(2.5f32)?;
/// assert_eq!(exposure.get::<f32>()?, 2.5);
/// ```
pub struct EffectParameter {
    name: String,
    ty: ParameterType,
    array_size: Option<u32>,
    value: RwLock<ParameterValue>,
}

impl EffectParameter {
    /// Create a zero-initialised parameter.
    pub fn new(name: impl Into<String>, ty: ParameterType, array_size: Option<u32>) -> Self {
        Self {
            name: name.into(),
            ty,
            array_size,
            value: RwLock::new(ParameterValue::zeroed(ty, array_size.unwrap_or(1))),
        }
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Semantic type.
    pub fn parameter_type(&self) -> ParameterType {
        self.ty
    }

    /// Element count for arrays.
    pub fn array_size(&self) -> Option<u32> {
        self.array_size
    }

    /// Whether the parameter is an array.
    pub fn is_array(&self) -> bool {
        self.array_size.is_some()
    }

    fn mismatch(&self, found: impl std::fmt::Debug) -> GraphicsError {
        GraphicsError::TypeMismatch {
            name: self.name.clone(),
            expected: self.describe(),
            found: format!("{found:?}"),
        }
    }

    fn describe(&self) -> String {
        match self.array_size {
            Some(n) => format!("{:?}[{n}]", self.ty),
            None => format!("{:?}", self.ty),
        }
    }

    fn check_numeric<T: ParameterData>(&self, array: bool) -> Result<(), GraphicsError> {
        if T::TYPE != self.ty || array != self.is_array() {
            let found = if array {
                format!("{:?}[]", T::TYPE)
            } else {
                format!("{:?}", T::TYPE)
            };
            return Err(GraphicsError::TypeMismatch {
                name: self.name.clone(),
                expected: self.describe(),
                found,
            });
        }
        Ok(())
    }

    /// Set a non-array numeric value.
    pub fn set<T: ParameterData>(&self, value: T) -> Result<(), GraphicsError> {
        self.check_numeric::<T>(false)?;
        let mut lanes = Vec::with_capacity(T::TYPE.components() as usize);
        value.write_lanes(&mut lanes);
        *self.value.write() = ParameterValue::Numeric(lanes);
        Ok(())
    }

    /// Get a non-array numeric value.
    pub fn get<T: ParameterData>(&self) -> Result<T, GraphicsError> {
        self.check_numeric::<T>(false)?;
        match &*self.value.read() {
            ParameterValue::Numeric(lanes) => Ok(T::read_lanes(lanes)),
            other => Err(self.mismatch(other)),
        }
    }

    /// Replace the elements of an array parameter.
    ///
    /// Fewer values than the array size are allowed; only those elements are
    /// written to constant buffers.
    pub fn set_array<T: ParameterData>(&self, values: &[T]) -> Result<(), GraphicsError> {
        self.check_numeric::<T>(true)?;
        let capacity = self.array_size.unwrap_or(0) as usize;
        if values.len() > capacity {
            return Err(GraphicsError::InvalidParameter(format!(
                "`{}` holds {capacity} elements, got {}",
                self.name,
                values.len()
            )));
        }
        let mut lanes = Vec::with_capacity(values.len() * T::TYPE.components() as usize);
        for value in values {
            value.write_lanes(&mut lanes);
        }
        *self.value.write() = ParameterValue::Numeric(lanes);
        Ok(())
    }

    /// Get the elements of an array parameter.
    pub fn get_array<T: ParameterData>(&self) -> Result<Vec<T>, GraphicsError> {
        self.check_numeric::<T>(true)?;
        match &*self.value.read() {
            ParameterValue::Numeric(lanes) => Ok(lanes
                .chunks_exact(T::TYPE.components() as usize)
                .map(T::read_lanes)
                .collect()),
            other => Err(self.mismatch(other)),
        }
    }

    /// Bind a texture (or none).
    pub fn set_texture(&self, texture: Option<Arc<Texture>>) -> Result<(), GraphicsError> {
        match self.ty {
            ParameterType::Texture(_) => {
                *self.value.write() = ParameterValue::Texture(texture);
                Ok(())
            }
            _ => Err(self.mismatch("Texture")),
        }
    }

    /// Currently bound texture.
    pub fn texture(&self) -> Option<Arc<Texture>> {
        match &*self.value.read() {
            ParameterValue::Texture(texture) => texture.clone(),
            _ => None,
        }
    }

    /// Bind a sampler (or none).
    pub fn set_sampler(&self, sampler: Option<Arc<Sampler>>) -> Result<(), GraphicsError> {
        match self.ty {
            ParameterType::Sampler => {
                *self.value.write() = ParameterValue::Sampler(sampler);
                Ok(())
            }
            _ => Err(self.mismatch("Sampler")),
        }
    }

    /// Currently bound sampler.
    pub fn sampler(&self) -> Option<Arc<Sampler>> {
        match &*self.value.read() {
            ParameterValue::Sampler(sampler) => sampler.clone(),
            _ => None,
        }
    }

    /// Bind a structured/raw buffer (or none).
    pub fn set_buffer(&self, buffer: Option<Arc<Buffer>>) -> Result<(), GraphicsError> {
        match self.ty {
            ParameterType::Buffer => {
                *self.value.write() = ParameterValue::Buffer(buffer);
                Ok(())
            }
            _ => Err(self.mismatch("Buffer")),
        }
    }

    /// Currently bound buffer.
    pub fn buffer(&self) -> Option<Arc<Buffer>> {
        match &*self.value.read() {
            ParameterValue::Buffer(buffer) => buffer.clone(),
            _ => None,
        }
    }

    /// Snapshot of the current value.
    pub fn value(&self) -> ParameterValue {
        self.value.read().clone()
    }

    /// Run `f` with the numeric lanes under the read lock.
    pub(crate) fn with_lanes<R>(&self, f: impl FnOnce(&[u32]) -> R) -> Option<R> {
        match &*self.value.read() {
            ParameterValue::Numeric(lanes) => Some(f(lanes)),
            _ => None,
        }
    }

    /// Overwrite the raw lanes (defaults from effect descriptions).
    pub(crate) fn set_lanes(&self, lanes: Vec<u32>) {
        *self.value.write() = ParameterValue::Numeric(lanes);
    }

    /// Independent copy with the same name, type and current value.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            name: self.name.clone(),
            ty: self.ty,
            array_size: self.array_size,
            value: RwLock::new(self.value()),
        }
    }
}

impl std::fmt::Debug for EffectParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectParameter")
            .field("name", &self.name)
            .field("type", &self.ty)
            .field("array_size", &self.array_size)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(EffectParameter: Send, Sync);
