//! Effects: parameters, techniques and passes over one shader source.
//!
//! An [`Effect`] is built from an [`EffectDescriptor`]. The immutable part
//! (descriptor, generated GLSL, techniques, shader descriptions and the
//! compiled-shader cache) lives in a shared template; parameters belong to
//! the instance. [`Effect::clone_instance`] gives a second set of parameter
//! values over the same template, so clones never recompile.

pub mod codegen;
pub mod desc;
pub mod parameter;

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::error::GraphicsError;
use crate::shader::cache::ShaderCache;
use crate::types::{PerStage, ShaderStage, ShaderStageFlags};

pub use desc::{
    CBufferDesc, CombinedSamplerDesc, DefaultValue, EffectDescriptor, Macro, ParameterDesc,
    PassDesc, TechniqueDesc, GLOBAL_CBUFFER,
};
pub use parameter::{EffectParameter, ParameterData, ParameterType, ParameterValue};

/// A distinct stage compile of an effect.
///
/// Passes that request the same entry point, profile and macros share one
/// description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDesc {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub profile: String,
    pub macros_hash: u64,
}

/// One pass of a technique.
#[derive(Debug, Clone)]
pub struct Pass {
    name: String,
    macros: Vec<Macro>,
    shaders: PerStage<Option<usize>>,
}

impl Pass {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effect, technique and pass macros merged; later levels win.
    pub fn macros(&self) -> &[Macro] {
        &self.macros
    }

    /// Id of the shader description used for `stage`.
    pub fn shader_desc_id(&self, stage: ShaderStage) -> Option<usize> {
        self.shaders[stage]
    }

    /// Stages with an entry point.
    pub fn stages(&self) -> ShaderStageFlags {
        self.shaders
            .iter()
            .filter(|(_, id)| id.is_some())
            .map(|(stage, _)| stage)
            .collect()
    }
}

/// A named, ordered list of passes.
#[derive(Debug, Clone)]
pub struct Technique {
    name: String,
    passes: Vec<Pass>,
}

impl Technique {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn pass(&self, index: usize) -> Option<&Pass> {
        self.passes.get(index)
    }

    pub fn pass_by_name(&self, name: &str) -> Option<&Pass> {
        self.passes.iter().find(|p| p.name == name)
    }
}

/// A texture/sampler pair reachable under `"{texture}_{sampler}"`.
#[derive(Debug, Clone)]
pub struct CombinedSampler {
    pub name: String,
    pub texture: Arc<EffectParameter>,
    pub sampler: Arc<EffectParameter>,
    pub stages: ShaderStageFlags,
}

#[derive(Debug)]
struct EffectTemplate {
    descriptor: EffectDescriptor,
    source: String,
    techniques: Vec<Technique>,
    shader_descs: Vec<ShaderDesc>,
    parameter_index: HashMap<String, usize>,
    cache: ShaderCache,
}

/// An effect instance.
#[derive(Debug)]
pub struct Effect {
    template: Arc<EffectTemplate>,
    parameters: Vec<Arc<EffectParameter>>,
    combined_samplers: Vec<CombinedSampler>,
}

fn merge_macros(levels: &[&[Macro]]) -> Vec<Macro> {
    let mut merged: Vec<Macro> = Vec::new();
    for (name, value) in levels.iter().flat_map(|level| level.iter()) {
        match merged.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.clone(),
            None => merged.push((name.clone(), value.clone())),
        }
    }
    merged
}

fn macros_hash(macros: &[Macro]) -> u64 {
    let mut hasher = DefaultHasher::new();
    macros.hash(&mut hasher);
    hasher.finish()
}

impl Effect {
    /// Build an effect: validate, generate source, create parameters with
    /// their defaults and resolve techniques.
    pub fn from_descriptor(descriptor: EffectDescriptor) -> Result<Self, GraphicsError> {
        descriptor.validate()?;
        let source = codegen::generate_source(&descriptor)?;

        let mut parameters = Vec::with_capacity(descriptor.parameters.len());
        for desc in &descriptor.parameters {
            let param = EffectParameter::new(desc.name.clone(), desc.ty, desc.array_size);
            if let Some(default) = &desc.default {
                param.set_lanes(default.to_lanes(&desc.name, desc.ty, desc.array_size.unwrap_or(1))?);
            }
            parameters.push(Arc::new(param));
        }
        let parameter_index = descriptor
            .parameters
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();

        let mut shader_descs: Vec<ShaderDesc> = Vec::new();
        let mut techniques = Vec::with_capacity(descriptor.techniques.len());
        for technique in &descriptor.techniques {
            let mut passes = Vec::with_capacity(technique.passes.len());
            for pass in &technique.passes {
                let macros = merge_macros(&[&descriptor.macros, &technique.macros, &pass.macros]);
                let hash = macros_hash(&macros);
                let mut shaders = PerStage::default();
                for stage in ShaderStage::ALL {
                    let Some(entry_point) = pass.entry_point(stage) else { continue };
                    let shader = ShaderDesc {
                        stage,
                        entry_point: entry_point.to_string(),
                        profile: pass
                            .profile
                            .clone()
                            .unwrap_or_else(|| stage.default_profile().to_string()),
                        macros_hash: hash,
                    };
                    let id = match shader_descs.iter().position(|d| *d == shader) {
                        Some(id) => id,
                        None => {
                            shader_descs.push(shader);
                            shader_descs.len() - 1
                        }
                    };
                    shaders[stage] = Some(id);
                }
                passes.push(Pass {
                    name: pass.name.clone(),
                    macros,
                    shaders,
                });
            }
            techniques.push(Technique {
                name: technique.name.clone(),
                passes,
            });
        }

        log::debug!(
            "effect `{}`: {} parameters, {} techniques, {} shader descriptions",
            descriptor.name,
            parameters.len(),
            techniques.len(),
            shader_descs.len()
        );

        let combined_samplers = Self::combine(&descriptor, &parameter_index, &parameters)?;
        Ok(Self {
            template: Arc::new(EffectTemplate {
                descriptor,
                source,
                techniques,
                shader_descs,
                parameter_index,
                cache: ShaderCache::new(),
            }),
            parameters,
            combined_samplers,
        })
    }

    /// Parse a RON description and build the effect.
    pub fn from_ron(text: &str) -> Result<Self, GraphicsError> {
        Self::from_descriptor(EffectDescriptor::from_ron(text)?)
    }

    fn combine(
        descriptor: &EffectDescriptor,
        index: &HashMap<String, usize>,
        parameters: &[Arc<EffectParameter>],
    ) -> Result<Vec<CombinedSampler>, GraphicsError> {
        let lookup = |name: &str| {
            index
                .get(name)
                .map(|&i| parameters[i].clone())
                .ok_or_else(|| GraphicsError::EffectParse(format!("unknown parameter `{name}`")))
        };
        descriptor
            .combined_samplers
            .iter()
            .map(|pair| {
                let stages = if pair.stages.is_empty() {
                    ShaderStageFlags::all()
                } else {
                    pair.stages.iter().copied().collect()
                };
                Ok(CombinedSampler {
                    name: format!("{}_{}", pair.texture, pair.sampler),
                    texture: lookup(&pair.texture)?,
                    sampler: lookup(&pair.sampler)?,
                    stages,
                })
            })
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.template.descriptor.name
    }

    pub fn descriptor(&self) -> &EffectDescriptor {
        &self.template.descriptor
    }

    /// Generated GLSL, includes expanded.
    pub fn source(&self) -> &str {
        &self.template.source
    }

    pub fn techniques(&self) -> &[Technique] {
        &self.template.techniques
    }

    pub fn technique_by_name(&self, name: &str) -> Option<&Technique> {
        self.template.techniques.iter().find(|t| t.name == name)
    }

    pub fn parameters(&self) -> &[Arc<EffectParameter>] {
        &self.parameters
    }

    pub fn parameter_by_name(&self, name: &str) -> Option<&Arc<EffectParameter>> {
        self.template
            .parameter_index
            .get(name)
            .and_then(|&i| self.parameters.get(i))
    }

    /// Combined texture/sampler registered under `name`.
    pub fn combined_sampler(&self, name: &str) -> Option<&CombinedSampler> {
        self.combined_samplers.iter().find(|c| c.name == name)
    }

    pub fn shader_desc(&self, id: usize) -> Option<&ShaderDesc> {
        self.template.shader_descs.get(id)
    }

    pub fn shader_descs(&self) -> &[ShaderDesc] {
        &self.template.shader_descs
    }

    /// Compiled-shader cache shared by every instance of this effect.
    pub fn cache(&self) -> &ShaderCache {
        &self.template.cache
    }

    /// New instance over the same template with copied parameter values.
    pub fn clone_instance(&self) -> Self {
        let parameters: Vec<Arc<EffectParameter>> = self
            .parameters
            .iter()
            .map(|p| Arc::new(p.duplicate()))
            .collect();
        let find = |old: &Arc<EffectParameter>| {
            self.parameters
                .iter()
                .position(|p| Arc::ptr_eq(p, old))
                .map(|i| parameters[i].clone())
                .unwrap_or_else(|| old.clone())
        };
        let combined_samplers = self
            .combined_samplers
            .iter()
            .map(|c| CombinedSampler {
                name: c.name.clone(),
                texture: find(&c.texture),
                sampler: find(&c.sampler),
                stages: c.stages,
            })
            .collect();
        Self {
            template: self.template.clone(),
            parameters,
            combined_samplers,
        }
    }

    /// Whether both instances come from the same description.
    pub fn shares_template(&self, other: &Effect) -> bool {
        Arc::ptr_eq(&self.template, &other.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureDimension;

    fn descriptor() -> EffectDescriptor {
        EffectDescriptor {
            name: "blur".into(),
            macros: vec![("TAPS".into(), "5".into()), ("HDR".into(), "0".into())],
            parameters: vec![
                ParameterDesc::new("exposure", ParameterType::Float).with_default(DefaultValue::Number(1.5)),
                ParameterDesc::new("src_tex", ParameterType::Texture(TextureDimension::D2)),
                ParameterDesc::new("point", ParameterType::Sampler),
            ],
            combined_samplers: vec![CombinedSamplerDesc {
                texture: "src_tex".into(),
                sampler: "point".into(),
                stages: vec![ShaderStage::Pixel],
            }],
            shader: "void BlurVS() {}\nvoid BlurPS() {}\n".into(),
            techniques: vec![
                TechniqueDesc {
                    name: "Blur".into(),
                    macros: vec![("HDR".into(), "1".into())],
                    passes: vec![
                        PassDesc {
                            name: "p0".into(),
                            vertex_shader: Some("BlurVS".into()),
                            pixel_shader: Some("BlurPS".into()),
                            ..Default::default()
                        },
                        PassDesc {
                            name: "p1".into(),
                            macros: vec![("TAPS".into(), "9".into())],
                            vertex_shader: Some("BlurVS".into()),
                            pixel_shader: Some("BlurPS".into()),
                            ..Default::default()
                        },
                    ],
                },
                TechniqueDesc {
                    name: "BlurCopy".into(),
                    macros: vec![("HDR".into(), "1".into())],
                    passes: vec![PassDesc {
                        name: "p0".into(),
                        vertex_shader: Some("BlurVS".into()),
                        pixel_shader: Some("BlurPS".into()),
                        ..Default::default()
                    }],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let effect = Effect::from_descriptor(descriptor()).unwrap();
        let exposure = effect.parameter_by_name("exposure").unwrap();
        assert_eq!(exposure.get::<f32>().unwrap(), 1.5);
        assert!(effect.parameter_by_name("missing").is_none());
    }

    #[test]
    fn test_macro_precedence() {
        let effect = Effect::from_descriptor(descriptor()).unwrap();
        let technique = effect.technique_by_name("Blur").unwrap();
        let p1 = technique.pass(1).unwrap();
        assert_eq!(
            p1.macros(),
            &[("TAPS".to_string(), "9".to_string()), ("HDR".to_string(), "1".to_string())]
        );
        assert_eq!(p1.stages(), ShaderStageFlags::VERTEX | ShaderStageFlags::PIXEL);
    }

    #[test]
    fn test_shader_descs_are_deduplicated() {
        let effect = Effect::from_descriptor(descriptor()).unwrap();
        // p0 of both techniques share macros; p1 differs.
        assert_eq!(effect.shader_descs().len(), 4);
        let blur_p0 = effect.technique_by_name("Blur").unwrap().pass(0).unwrap();
        let copy_p0 = effect.technique_by_name("BlurCopy").unwrap().pass(0).unwrap();
        assert_eq!(
            blur_p0.shader_desc_id(ShaderStage::Pixel),
            copy_p0.shader_desc_id(ShaderStage::Pixel)
        );
        let id = blur_p0.shader_desc_id(ShaderStage::Pixel).unwrap();
        let desc = effect.shader_desc(id).unwrap();
        assert_eq!(desc.entry_point, "BlurPS");
        assert_eq!(desc.profile, "ps_5_0");
    }

    #[test]
    fn test_combined_sampler_registry() {
        let effect = Effect::from_descriptor(descriptor()).unwrap();
        let combined = effect.combined_sampler("src_tex_point").unwrap();
        assert!(Arc::ptr_eq(&combined.texture, effect.parameter_by_name("src_tex").unwrap()));
        assert_eq!(combined.stages, ShaderStageFlags::PIXEL);
    }

    #[test]
    fn test_clone_instance_copies_values() {
        let effect = Effect::from_descriptor(descriptor()).unwrap();
        let clone = effect.clone_instance();
        assert!(clone.shares_template(&effect));

        effect.parameter_by_name("exposure").unwrap().set(3.0f32).unwrap();
        assert_eq!(clone.parameter_by_name("exposure").unwrap().get::<f32>().unwrap(), 1.5);

        let combined = clone.combined_sampler("src_tex_point").unwrap();
        assert!(Arc::ptr_eq(&combined.texture, clone.parameter_by_name("src_tex").unwrap()));
    }

    #[test]
    fn test_from_ron() {
        let effect = Effect::from_ron(
            r#"(
                name: "solid",
                parameters: [(name: "color", ty: Float4, default: Some(List([1.0, 0.0, 0.0, 1.0])))],
                shader: "void SolidPS() {}",
                techniques: [(name: "Solid", passes: [(name: "p0", pixel_shader: Some("SolidPS"))])],
            )"#,
        )
        .unwrap();
        assert_eq!(effect.name(), "solid");
        assert!(effect.source().contains("uniform global_cb"));
        let color = effect.parameter_by_name("color").unwrap();
        assert_eq!(color.get::<klayge_core::math::Vec4>().unwrap().x, 1.0);
    }
}
