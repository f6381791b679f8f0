//! Per-stage resource slot arrays.

use std::sync::Arc;

use crate::resources::{Buffer, Sampler, Texture};
use crate::shader::reflection::{ResourceKind, SlotClass, StageReflection};

/// Resources bound to one stage, indexed by native slot.
///
/// Arrays are sized to the highest used slot + 1 and are handed to the
/// render context whole on every bind; there is no dirty tracking.
#[derive(Debug, Clone, Default)]
pub struct ResourceSlotTable {
    pub textures: Vec<Option<Arc<Texture>>>,
    pub samplers: Vec<Option<Arc<Sampler>>>,
    pub buffers: Vec<Option<Arc<Buffer>>>,
}

impl ResourceSlotTable {
    /// Empty table sized for `reflection`.
    ///
    /// Combined texture/sampler slots also occupy the sampler slot with the
    /// same index.
    pub fn for_stage(reflection: &StageReflection) -> Self {
        let combined = reflection
            .resources
            .iter()
            .filter(|r| matches!(r.kind, ResourceKind::CombinedTextureSampler(_)))
            .map(|r| r.slot as usize + 1)
            .max()
            .unwrap_or(0);
        Self {
            textures: vec![None; reflection.slot_count(SlotClass::Texture)],
            samplers: vec![None; reflection.slot_count(SlotClass::Sampler).max(combined)],
            buffers: vec![None; reflection.slot_count(SlotClass::Buffer)],
        }
    }

    /// Whether the stage uses no resource slots.
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.samplers.is_empty() && self.buffers.is_empty()
    }

    /// Set every slot to "no resource", keeping the sizes.
    pub fn clear(&mut self) {
        self.textures.iter_mut().for_each(|t| *t = None);
        self.samplers.iter_mut().for_each(|s| *s = None);
        self.buffers.iter_mut().for_each(|b| *b = None);
    }
}
