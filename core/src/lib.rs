//! # KlayGE Core
//!
//! Engine-side value types shared by the shader binding layer, plus
//! optional profiling hooks.

pub mod math;
pub mod profiling;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
