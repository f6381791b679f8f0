//! GPU texture resource.

use crate::backend::GpuTexture;
use crate::types::{TextureDescriptor, TextureDimension, TextureFormat};

use super::ResourceId;

/// A GPU texture.
///
/// ```ignore
/// let texture = ctx.create_texture(&TextureDescriptor::new_2d(
///     256, 256,
///     TextureFormat::Rgba8Unorm,
/// ))?;
/// effect.parameter_by_name("albedo_tex").unwrap().set_texture(Some(texture))?;
/// ```
pub struct Texture {
    id: ResourceId,
    descriptor: TextureDescriptor,
    gpu: GpuTexture,
}

impl Texture {
    /// Create a new texture (called by render contexts).
    pub(crate) fn new(descriptor: TextureDescriptor, gpu: GpuTexture) -> Self {
        Self {
            id: ResourceId::next(),
            descriptor,
            gpu,
        }
    }

    /// Resource identity.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Get the texture dimension.
    pub fn dimension(&self) -> TextureDimension {
        self.descriptor.dimension
    }

    /// Get the texture format.
    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    /// Get the texture label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Backend handle.
    pub fn gpu_handle(&self) -> &GpuTexture {
        &self.gpu
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("dimension", &self.descriptor.dimension)
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
