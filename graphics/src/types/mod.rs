//! Common types and descriptors shared by effects, shaders and backends.
//!
//! This module contains the shader stage model, scalar kinds, and the
//! descriptor structs used to create textures, samplers and buffers.

mod buffer;
mod sampler;
mod scalar;
mod stage;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use scalar::ScalarType;
pub use stage::{PerStage, ShaderStage, ShaderStageFlags};
pub use texture::{TextureDescriptor, TextureDimension, TextureFormat};
