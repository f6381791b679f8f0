//! Serializable effect descriptions.
//!
//! An effect is described once (usually in a RON file) and turned into an
//! [`Effect`](super::Effect) with generated shader source.
//!
//! ```ron
//! (
//!     name: "tonemap",
//!     parameters: [
//!         (name: "exposure", ty: Float, default: Some(Number(1.0))),
//!         (name: "src_tex", ty: Texture(D2)),
//!         (name: "point_sampler", ty: Sampler),
//!     ],
//!     shader: "...",
//!     techniques: [
//!         (name: "Tonemap", passes: [
//!             (name: "p0", vertex_shader: Some("TonemapVS"), pixel_shader: Some("TonemapPS")),
//!         ]),
//!     ],
//! )
//! ```

use serde::{Deserialize, Serialize};

use crate::error::GraphicsError;
use crate::types::{ScalarType, ShaderStage};

use super::parameter::ParameterType;

/// Name of the constant buffer holding numeric parameters that are not
/// listed in any explicit buffer.
pub const GLOBAL_CBUFFER: &str = "global_cb";

/// Preprocessor macro `(name, value)`.
pub type Macro = (String, String);

/// Complete description of an effect.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectDescriptor {
    /// Effect name used in logs.
    pub name: String,
    /// Macros defined for every pass.
    pub macros: Vec<Macro>,
    /// All parameters.
    pub parameters: Vec<ParameterDesc>,
    /// Explicit constant buffers and the parameters they contain, in order.
    pub cbuffers: Vec<CBufferDesc>,
    /// Texture/sampler pairs some backends see as one combined name.
    pub combined_samplers: Vec<CombinedSamplerDesc>,
    /// Named sources available to `#include`.
    pub includes: Vec<(String, String)>,
    /// Shader body (GLSL 450, Vulkan flavour).
    pub shader: String,
    /// Techniques.
    pub techniques: Vec<TechniqueDesc>,
}

/// Description of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDesc {
    pub name: String,
    pub ty: ParameterType,
    #[serde(default)]
    pub array_size: Option<u32>,
    #[serde(default)]
    pub default: Option<DefaultValue>,
}

impl ParameterDesc {
    /// Create a non-array parameter description.
    pub fn new(name: impl Into<String>, ty: ParameterType) -> Self {
        Self {
            name: name.into(),
            ty,
            array_size: None,
            default: None,
        }
    }

    /// Make this an array of `size` elements.
    pub fn with_array_size(mut self, size: u32) -> Self {
        self.array_size = Some(size);
        self
    }

    /// Set the initial value.
    pub fn with_default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }
}

/// Initial value of a numeric parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    Bool(bool),
    Number(f64),
    List(Vec<f64>),
}

impl DefaultValue {
    /// Encode as lanes of `ty` for `count` elements.
    ///
    /// A single value fills every lane; a list must have exactly
    /// `components * count` entries.
    pub fn to_lanes(
        &self,
        name: &str,
        ty: ParameterType,
        count: u32,
    ) -> Result<Vec<u32>, GraphicsError> {
        let scalar = ty.scalar_type().ok_or_else(|| {
            GraphicsError::EffectParse(format!("resource parameter `{name}` cannot have a default"))
        })?;
        let lanes = (ty.components() * count) as usize;
        let values: Vec<f64> = match self {
            Self::Bool(b) => vec![if *b { 1.0 } else { 0.0 }; lanes],
            Self::Number(n) => vec![*n; lanes],
            Self::List(list) if list.len() == lanes => list.clone(),
            Self::List(list) => {
                return Err(GraphicsError::EffectParse(format!(
                    "default for `{name}` has {} values, expected {lanes}",
                    list.len()
                )));
            }
        };
        Ok(values
            .into_iter()
            .map(|v| match scalar {
                ScalarType::Bool => u32::from(v != 0.0),
                ScalarType::UInt => v as u32,
                ScalarType::Int => (v as i32) as u32,
                ScalarType::Float => (v as f32).to_bits(),
            })
            .collect())
    }
}

/// An explicit constant buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CBufferDesc {
    pub name: String,
    pub parameters: Vec<String>,
}

/// A texture/sampler pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSamplerDesc {
    pub texture: String,
    pub sampler: String,
    /// Stages that may see the combined name; empty means every stage.
    #[serde(default)]
    pub stages: Vec<ShaderStage>,
}

/// A technique: an ordered list of passes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TechniqueDesc {
    pub name: String,
    pub macros: Vec<Macro>,
    pub passes: Vec<PassDesc>,
}

/// A pass: entry points per stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PassDesc {
    pub name: String,
    pub macros: Vec<Macro>,
    pub vertex_shader: Option<String>,
    pub pixel_shader: Option<String>,
    pub geometry_shader: Option<String>,
    pub hull_shader: Option<String>,
    pub domain_shader: Option<String>,
    pub compute_shader: Option<String>,
    /// Profile override applied to every stage of the pass.
    pub profile: Option<String>,
}

impl PassDesc {
    /// Entry point requested for `stage`.
    pub fn entry_point(&self, stage: ShaderStage) -> Option<&str> {
        match stage {
            ShaderStage::Vertex => self.vertex_shader.as_deref(),
            ShaderStage::Pixel => self.pixel_shader.as_deref(),
            ShaderStage::Geometry => self.geometry_shader.as_deref(),
            ShaderStage::Hull => self.hull_shader.as_deref(),
            ShaderStage::Domain => self.domain_shader.as_deref(),
            ShaderStage::Compute => self.compute_shader.as_deref(),
        }
    }
}

impl EffectDescriptor {
    /// Parse a RON effect description.
    pub fn from_ron(text: &str) -> Result<Self, GraphicsError> {
        ron::from_str(text).map_err(|e| GraphicsError::EffectParse(e.to_string()))
    }

    /// Serialize to pretty RON.
    pub fn to_ron(&self) -> Result<String, GraphicsError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| GraphicsError::Internal(e.to_string()))
    }

    /// Description of the parameter named `name`.
    pub fn parameter(&self, name: &str) -> Option<&ParameterDesc> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Constant buffers with their parameter descriptions, including the
    /// implicit [`GLOBAL_CBUFFER`] for loose numeric parameters.
    pub fn constant_buffers(&self) -> Vec<(String, Vec<&ParameterDesc>)> {
        let mut buffers: Vec<(String, Vec<&ParameterDesc>)> = self
            .cbuffers
            .iter()
            .map(|cb| {
                let params = cb
                    .parameters
                    .iter()
                    .filter_map(|name| self.parameter(name))
                    .collect();
                (cb.name.clone(), params)
            })
            .collect();

        let loose: Vec<&ParameterDesc> = self
            .parameters
            .iter()
            .filter(|p| !p.ty.is_resource())
            .filter(|p| !self.cbuffers.iter().any(|cb| cb.parameters.contains(&p.name)))
            .collect();
        if !loose.is_empty() {
            match buffers.iter_mut().find(|(name, _)| name == GLOBAL_CBUFFER) {
                Some((_, params)) => params.extend(loose),
                None => buffers.push((GLOBAL_CBUFFER.to_string(), loose)),
            }
        }

        buffers.retain(|(_, params)| !params.is_empty());
        buffers
    }

    /// Check names and cross references.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(GraphicsError::EffectParse(format!(
                    "duplicate parameter `{}`",
                    param.name
                )));
            }
            if param.array_size == Some(0) {
                return Err(GraphicsError::EffectParse(format!(
                    "array parameter `{}` has zero elements",
                    param.name
                )));
            }
            if param.ty.is_resource() && param.array_size.is_some() {
                return Err(GraphicsError::EffectParse(format!(
                    "resource parameter `{}` cannot be an array",
                    param.name
                )));
            }
        }

        let mut owner = std::collections::HashMap::new();
        for cb in &self.cbuffers {
            for name in &cb.parameters {
                let param = self.parameter(name).ok_or_else(|| {
                    GraphicsError::EffectParse(format!(
                        "cbuffer `{}` lists unknown parameter `{name}`",
                        cb.name
                    ))
                })?;
                if param.ty.is_resource() {
                    return Err(GraphicsError::EffectParse(format!(
                        "cbuffer `{}` lists resource parameter `{name}`",
                        cb.name
                    )));
                }
                if let Some(previous) = owner.insert(name.as_str(), cb.name.as_str()) {
                    return Err(GraphicsError::EffectParse(format!(
                        "parameter `{name}` is in both `{previous}` and `{}`",
                        cb.name
                    )));
                }
            }
        }

        for pair in &self.combined_samplers {
            let texture = self.parameter(&pair.texture);
            let sampler = self.parameter(&pair.sampler);
            let valid = matches!(texture.map(|p| p.ty), Some(ParameterType::Texture(_)))
                && matches!(sampler.map(|p| p.ty), Some(ParameterType::Sampler));
            if !valid {
                return Err(GraphicsError::EffectParse(format!(
                    "combined sampler `{}_{}` needs a texture and a sampler parameter",
                    pair.texture, pair.sampler
                )));
            }
        }

        for technique in &self.techniques {
            for pass in &technique.passes {
                if ShaderStage::ALL
                    .iter()
                    .all(|stage| pass.entry_point(*stage).is_none())
                {
                    return Err(GraphicsError::EffectParse(format!(
                        "pass `{}/{}` has no shader stages",
                        technique.name, pass.name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureDimension;

    fn descriptor() -> EffectDescriptor {
        EffectDescriptor {
            name: "test".into(),
            parameters: vec![
                ParameterDesc::new("world", ParameterType::Float4x4),
                ParameterDesc::new("exposure", ParameterType::Float),
                ParameterDesc::new("albedo_tex", ParameterType::Texture(TextureDimension::D2)),
                ParameterDesc::new("albedo_sampler", ParameterType::Sampler),
            ],
            cbuffers: vec![CBufferDesc {
                name: "per_object".into(),
                parameters: vec!["world".into()],
            }],
            techniques: vec![TechniqueDesc {
                name: "Draw".into(),
                passes: vec![PassDesc {
                    name: "p0".into(),
                    vertex_shader: Some("DrawVS".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_loose_parameters_go_to_global_cb() {
        let desc = descriptor();
        let buffers = desc.constant_buffers();
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers[0].0, "per_object");
        assert_eq!(buffers[1].0, GLOBAL_CBUFFER);
        assert_eq!(buffers[1].1.len(), 1);
        assert_eq!(buffers[1].1[0].name, "exposure");
    }

    #[test]
    fn test_validate_accepts_descriptor() {
        descriptor().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut desc = descriptor();
        desc.parameters
            .push(ParameterDesc::new("exposure", ParameterType::Int));
        assert!(matches!(desc.validate(), Err(GraphicsError::EffectParse(_))));
    }

    #[test]
    fn test_validate_rejects_resource_in_cbuffer() {
        let mut desc = descriptor();
        desc.cbuffers[0].parameters.push("albedo_tex".into());
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_combined_pair() {
        let mut desc = descriptor();
        desc.combined_samplers.push(CombinedSamplerDesc {
            texture: "albedo_sampler".into(),
            sampler: "albedo_tex".into(),
            stages: vec![],
        });
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_default_lanes() {
        let lanes = DefaultValue::Number(2.0)
            .to_lanes("v", ParameterType::Float2, 1)
            .unwrap();
        assert_eq!(lanes, vec![2.0f32.to_bits(); 2]);

        let lanes = DefaultValue::Bool(true)
            .to_lanes("b", ParameterType::Bool, 3)
            .unwrap();
        assert_eq!(lanes, vec![1, 1, 1]);

        let lanes = DefaultValue::List(vec![-1.0, 2.0])
            .to_lanes("i", ParameterType::Int2, 1)
            .unwrap();
        assert_eq!(lanes, vec![(-1i32) as u32, 2]);

        assert!(DefaultValue::List(vec![1.0])
            .to_lanes("v", ParameterType::Float3, 1)
            .is_err());
    }

    #[test]
    fn test_ron_roundtrip() {
        let desc = descriptor();
        let text = desc.to_ron().unwrap();
        assert_eq!(EffectDescriptor::from_ron(&text).unwrap(), desc);
    }

    #[test]
    fn test_from_ron_text() {
        let text = r#"(
            name: "blur",
            parameters: [
                (name: "weights", ty: Float, array_size: Some(4), default: Some(Number(0.25))),
                (name: "src_tex", ty: Texture(D2)),
            ],
            techniques: [
                (name: "Blur", passes: [(name: "p0", compute_shader: Some("BlurCS"))]),
            ],
        )"#;
        let desc = EffectDescriptor::from_ron(text).unwrap();
        assert_eq!(desc.parameters[0].array_size, Some(4));
        assert_eq!(
            desc.techniques[0].passes[0].entry_point(ShaderStage::Compute),
            Some("BlurCS")
        );
        desc.validate().unwrap();
    }
}
