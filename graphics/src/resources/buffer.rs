//! GPU buffer resource bound as a structured/raw shader buffer.

use crate::backend::GpuBuffer;
use crate::types::BufferDescriptor;

use super::ResourceId;

/// A GPU buffer bound through a buffer slot.
pub struct Buffer {
    id: ResourceId,
    descriptor: BufferDescriptor,
    gpu: GpuBuffer,
}

impl Buffer {
    /// Create a new buffer (called by render contexts).
    pub(crate) fn new(descriptor: BufferDescriptor, gpu: GpuBuffer) -> Self {
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

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Backend handle.
    pub fn gpu_handle(&self) -> &GpuBuffer {
        &self.gpu
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);
