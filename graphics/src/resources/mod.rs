//! GPU resources bound through shader resource slots.
//!
//! - [`Texture`] - shader-readable image
//! - [`Sampler`] - texture sampling state
//! - [`Buffer`] - structured/raw buffer
//!
//! Resources are created by a [`RenderContext`] and reference-counted with
//! [`Arc`]; effect parameters and slot tables hold them by `Arc`.
//!
//! [`RenderContext`]: crate::backend::RenderContext
//! [`Arc`]: std::sync::Arc

mod buffer;
mod sampler;
mod texture;

use std::sync::atomic::{AtomicU64, Ordering};

pub use buffer::Buffer;
pub use sampler::Sampler;
pub use texture::Texture;

/// Process-unique identity of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}
