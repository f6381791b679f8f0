//! Texture types and descriptors.

use serde::{Deserialize, Serialize};

/// Dimensionality of a texture and of the shader resource slot it binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureDimension {
    D1,
    D1Array,
    #[default]
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

impl TextureDimension {
    /// Whether this dimension has array layers.
    pub fn is_array(self) -> bool {
        matches!(self, Self::D1Array | Self::D2Array | Self::CubeArray)
    }
}

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 32-bit red channel, float.
    R32Float,
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Dimensionality.
    pub dimension: TextureDimension,
    /// Width in texels.
    pub width: u32,
    /// Height in texels (1 for 1D textures).
    pub height: u32,
    /// Depth for 3D textures, layer count for arrays, 6 per cube.
    pub depth_or_layers: u32,
    /// Number of mip levels.
    pub mip_level_count: u32,
    /// Texel format.
    pub format: TextureFormat,
}

impl TextureDescriptor {
    /// Create a 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            dimension: TextureDimension::D2,
            width,
            height,
            depth_or_layers: 1,
            mip_level_count: 1,
            format,
        }
    }

    /// Create a cube texture descriptor.
    pub fn new_cube(size: u32, format: TextureFormat) -> Self {
        Self {
            dimension: TextureDimension::Cube,
            depth_or_layers: 6,
            ..Self::new_2d(size, size, format)
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }
}
