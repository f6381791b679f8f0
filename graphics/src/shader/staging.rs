//! CPU staging for constant buffers.
//!
//! Each shader object owns one [`ConstantBuffer`] per distinct buffer name
//! of its program. Binds write lanes into the staging bytes and mark the
//! buffer dirty; [`ConstantBufferStore::flush`] uploads every dirty buffer
//! in full and clears the flag.

use klayge_core::profiling::profile_scope;

use crate::backend::{GpuBuffer, RenderContext};
use crate::error::GraphicsError;
use crate::types::ScalarType;

use super::cache::ProgramCBuffer;

/// Staging bytes and GPU buffer of one constant buffer.
#[derive(Debug)]
pub struct ConstantBuffer {
    name: String,
    data: Vec<u8>,
    dirty: bool,
    gpu: GpuBuffer,
}

impl ConstantBuffer {
    /// Zero-filled, dirty buffer.
    pub fn new(name: impl Into<String>, size: u32, gpu: GpuBuffer) -> Self {
        Self {
            name: name.into(),
            data: vec![0; size as usize],
            dirty: true,
            gpu,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Staging bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the staging bytes differ from the last upload.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn gpu_buffer(&self) -> &GpuBuffer {
        &self.gpu
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Write one raw 32-bit lane at `offset`. Out-of-range writes are dropped.
    pub fn write_lane(&mut self, offset: u32, lane: u32) {
        let start = offset as usize;
        if let Some(dst) = self.data.get_mut(start..start + ScalarType::SIZE as usize) {
            dst.copy_from_slice(bytemuck::bytes_of(&lane));
        }
    }

    /// Read one raw lane at `offset`.
    pub fn read_lane(&self, offset: u32) -> Option<u32> {
        let start = offset as usize;
        let bytes = self.data.get(start..start + ScalarType::SIZE as usize)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Read an `f32` at `offset`.
    pub fn read_f32(&self, offset: u32) -> Option<f32> {
        self.read_lane(offset).map(f32::from_bits)
    }

    fn flush(&mut self, ctx: &mut dyn RenderContext) -> bool {
        if !self.dirty {
            return false;
        }
        ctx.update_constant_buffer(&self.gpu, &self.data);
        self.dirty = false;
        true
    }
}

/// Every constant buffer of one shader object.
#[derive(Debug, Default)]
pub struct ConstantBufferStore {
    buffers: Vec<ConstantBuffer>,
}

impl ConstantBufferStore {
    /// Allocate staging and GPU buffers for a program layout.
    pub fn create(ctx: &mut dyn RenderContext, layout: &[ProgramCBuffer]) -> Result<Self, GraphicsError> {
        let buffers = layout
            .iter()
            .map(|cb| {
                let gpu = ctx.create_constant_buffer(&cb.name, cb.size)?;
                Ok(ConstantBuffer::new(cb.name.clone(), cb.size, gpu))
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;
        Ok(Self { buffers })
    }

    /// Append a buffer; returns its index.
    pub fn push(&mut self, buffer: ConstantBuffer) -> usize {
        self.buffers.push(buffer);
        self.buffers.len() - 1
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ConstantBuffer> {
        self.buffers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ConstantBuffer> {
        self.buffers.get_mut(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&ConstantBuffer> {
        self.buffers.iter().find(|cb| cb.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstantBuffer> {
        self.buffers.iter()
    }

    /// Upload every dirty buffer. Returns the number of uploads.
    pub fn flush(&mut self, ctx: &mut dyn RenderContext) -> usize {
        profile_scope!("cbuffer_flush");
        self.buffers.iter_mut().filter_map(|cb| cb.flush(ctx).then_some(())).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyContext;

    fn layout() -> Vec<ProgramCBuffer> {
        vec![
            ProgramCBuffer {
                name: "per_frame".into(),
                size: 64,
            },
            ProgramCBuffer {
                name: "global_cb".into(),
                size: 16,
            },
        ]
    }

    #[test]
    fn test_buffers_start_zeroed_and_dirty() {
        let mut ctx = DummyContext::new();
        let store = ConstantBufferStore::create(&mut ctx, &layout()).unwrap();
        assert_eq!(store.len(), 2);
        let cb = store.by_name("per_frame").unwrap();
        assert_eq!(cb.len(), 64);
        assert!(cb.is_dirty());
        assert!(cb.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_flush_uploads_dirty_once() {
        let mut ctx = DummyContext::new();
        let mut store = ConstantBufferStore::create(&mut ctx, &layout()).unwrap();
        ctx.clear_calls();

        assert_eq!(store.flush(&mut ctx), 2);
        assert_eq!(store.flush(&mut ctx), 0);
        assert!(store.iter().all(|cb| !cb.is_dirty()));

        let cb = store.get_mut(1).unwrap();
        cb.write_lane(4, 2.5f32.to_bits());
        cb.mark_dirty();
        assert_eq!(store.flush(&mut ctx), 1);
        assert_eq!(ctx.upload_count(), 3);
    }

    #[test]
    fn test_lane_access() {
        let mut cb = ConstantBuffer::new("cb", 16, GpuBuffer::Dummy { id: 0 });
        cb.write_lane(12, 7);
        assert_eq!(cb.read_lane(12), Some(7));
        cb.write_lane(14, 1);
        assert_eq!(cb.read_lane(14), None);
        cb.write_lane(0, 0.5f32.to_bits());
        assert_eq!(cb.read_f32(0), Some(0.5));
    }
}
