//! Shader stages.

use std::ops::{Index, IndexMut};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// A programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Hull,
    Domain,
    Compute,
}

impl ShaderStage {
    /// Number of stages.
    pub const COUNT: usize = 6;

    /// All stages in pipeline order.
    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::Pixel,
        ShaderStage::Geometry,
        ShaderStage::Hull,
        ShaderStage::Domain,
        ShaderStage::Compute,
    ];

    /// Dense index of this stage.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lowercase stage name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Pixel => "pixel",
            Self::Geometry => "geometry",
            Self::Hull => "hull",
            Self::Domain => "domain",
            Self::Compute => "compute",
        }
    }

    /// Preprocessor symbol defined while compiling this stage.
    pub fn define(self) -> &'static str {
        match self {
            Self::Vertex => "KLAYGE_VERTEX_SHADER",
            Self::Pixel => "KLAYGE_PIXEL_SHADER",
            Self::Geometry => "KLAYGE_GEOMETRY_SHADER",
            Self::Hull => "KLAYGE_HULL_SHADER",
            Self::Domain => "KLAYGE_DOMAIN_SHADER",
            Self::Compute => "KLAYGE_COMPUTE_SHADER",
        }
    }

    /// Profile used when a pass does not name one.
    pub fn default_profile(self) -> &'static str {
        match self {
            Self::Vertex => "vs_5_0",
            Self::Pixel => "ps_5_0",
            Self::Geometry => "gs_5_0",
            Self::Hull => "hs_5_0",
            Self::Domain => "ds_5_0",
            Self::Compute => "cs_5_0",
        }
    }

    /// The single-bit mask for this stage.
    pub fn flag(self) -> ShaderStageFlags {
        match self {
            Self::Vertex => ShaderStageFlags::VERTEX,
            Self::Pixel => ShaderStageFlags::PIXEL,
            Self::Geometry => ShaderStageFlags::GEOMETRY,
            Self::Hull => ShaderStageFlags::HULL,
            Self::Domain => ShaderStageFlags::DOMAIN,
            Self::Compute => ShaderStageFlags::COMPUTE,
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Set of shader stages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
        const GEOMETRY = 1 << 2;
        const HULL = 1 << 3;
        const DOMAIN = 1 << 4;
        const COMPUTE = 1 << 5;
        const GRAPHICS = Self::VERTEX.bits()
            | Self::PIXEL.bits()
            | Self::GEOMETRY.bits()
            | Self::HULL.bits()
            | Self::DOMAIN.bits();
    }
}

impl ShaderStageFlags {
    /// Iterate the stages contained in this set, in pipeline order.
    pub fn stages(self) -> impl Iterator<Item = ShaderStage> {
        ShaderStage::ALL
            .into_iter()
            .filter(move |stage| self.contains(stage.flag()))
    }
}

impl FromIterator<ShaderStage> for ShaderStageFlags {
    fn from_iter<I: IntoIterator<Item = ShaderStage>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |flags, stage| flags | stage.flag())
    }
}

/// One value per shader stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerStage<T>([T; ShaderStage::COUNT]);

impl<T> PerStage<T> {
    /// Build by calling `f` for every stage.
    pub fn from_fn(mut f: impl FnMut(ShaderStage) -> T) -> Self {
        Self(std::array::from_fn(|i| f(ShaderStage::ALL[i])))
    }

    /// Iterate `(stage, value)` pairs in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (ShaderStage, &T)> {
        ShaderStage::ALL.into_iter().zip(self.0.iter())
    }

    /// Iterate `(stage, value)` pairs mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ShaderStage, &mut T)> {
        ShaderStage::ALL.into_iter().zip(self.0.iter_mut())
    }
}

impl<T> Index<ShaderStage> for PerStage<T> {
    type Output = T;

    fn index(&self, stage: ShaderStage) -> &T {
        &self.0[stage.index()]
    }
}

impl<T> IndexMut<ShaderStage> for PerStage<T> {
    fn index_mut(&mut self, stage: ShaderStage) -> &mut T {
        &mut self.0[stage.index()]
    }
}
