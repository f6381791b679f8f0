//! GPU sampler resource.

use crate::backend::GpuSampler;
use crate::types::SamplerDescriptor;

use super::ResourceId;

/// A GPU texture sampler.
pub struct Sampler {
    id: ResourceId,
    descriptor: SamplerDescriptor,
    gpu: GpuSampler,
}

impl Sampler {
    /// Create a new sampler (called by render contexts).
    pub(crate) fn new(descriptor: SamplerDescriptor, gpu: GpuSampler) -> Self {
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

    /// Get the sampler descriptor.
    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    /// Get the sampler label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Backend handle.
    pub fn gpu_handle(&self) -> &GpuSampler {
        &self.gpu
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("id", &self.id)
            .field("mag_filter", &self.descriptor.mag_filter)
            .field("min_filter", &self.descriptor.min_filter)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Sampler: Send, Sync);
