//! Shared fixtures for shader object integration tests.
//!
//! Most tests run against [`DummyContext`] with a [`DummyCompiler`] that
//! hands out fixed reflection data, so layouts are known exactly. The naga
//! tests compile a small GLSL effect instead.

#![allow(dead_code)]

use klayge_graphics::shader::reflection::{
    ReflectedResourceSlot, ReflectedVariable, ResourceKind, StageReflection,
};
use klayge_graphics::effect::{
    CBufferDesc, CombinedSamplerDesc, ParameterDesc, PassDesc, TechniqueDesc,
};
use klayge_graphics::{
    DummyCompiler, DummyContext, Effect, EffectDescriptor, NativeCall, ParameterType, ScalarType,
    ShaderStage, TextureDimension,
};

/// Install a test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const TECHNIQUE: &str = "Draw";

/// Byte offsets of the fixture's `global_cb` layout.
pub mod offsets {
    pub const FLAG: u32 = 0;
    pub const COUNT: u32 = 4;
    pub const BIAS: u32 = 8;
    pub const EXPOSURE: u32 = 12;
    pub const TINT: u32 = 16;
    pub const LIT: u32 = 28;
    pub const JITTER: u32 = 32;
    pub const GLOBAL_SIZE: u32 = 80;
}

fn pass(name: &str, vs: &str, ps: &str) -> PassDesc {
    PassDesc {
        name: name.into(),
        vertex_shader: Some(vs.into()),
        pixel_shader: Some(ps.into()),
        ..Default::default()
    }
}

/// Effect with scalars, a vector, an array, a matrix and a texture/sampler pair.
pub fn material_descriptor() -> EffectDescriptor {
    EffectDescriptor {
        name: "material".into(),
        parameters: vec![
            ParameterDesc::new("flag", ParameterType::Bool),
            ParameterDesc::new("count", ParameterType::UInt),
            ParameterDesc::new("bias", ParameterType::Int),
            ParameterDesc::new("exposure", ParameterType::Float),
            ParameterDesc::new("tint", ParameterType::Float3),
            ParameterDesc::new("lit", ParameterType::Bool),
            ParameterDesc::new("jitter", ParameterType::Float2).with_array_size(3),
            ParameterDesc::new("world", ParameterType::Float4x4),
            ParameterDesc::new("albedo_tex", ParameterType::Texture(TextureDimension::D2)),
            ParameterDesc::new("albedo_sampler", ParameterType::Sampler),
        ],
        cbuffers: vec![CBufferDesc {
            name: "per_object".into(),
            parameters: vec!["world".into()],
        }],
        combined_samplers: vec![CombinedSamplerDesc {
            texture: "albedo_tex".into(),
            sampler: "albedo_sampler".into(),
            stages: vec![ShaderStage::Pixel],
        }],
        techniques: vec![
            TechniqueDesc {
                name: TECHNIQUE.into(),
                passes: vec![pass("p0", "DrawVS", "DrawPS")],
                ..Default::default()
            },
            TechniqueDesc {
                name: "Combined".into(),
                passes: vec![pass("p0", "DrawVS", "CombinedPS")],
                ..Default::default()
            },
            TechniqueDesc {
                name: "Legacy".into(),
                passes: vec![pass("p0", "DrawVS", "LegacyPS")],
                ..Default::default()
            },
            TechniqueDesc {
                name: "Broken".into(),
                passes: vec![pass("p0", "DrawVS", "BrokenPS")],
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

pub fn material_effect() -> Effect {
    Effect::from_descriptor(material_descriptor()).unwrap()
}

fn vertex_reflection() -> StageReflection {
    StageReflection::new(ShaderStage::Vertex).with_constant_buffer(
        "per_object",
        0,
        64,
        vec![ReflectedVariable::matrix("world", 0, 0, 4, 4)],
    )
}

fn global_variables() -> Vec<ReflectedVariable> {
    use offsets::*;
    vec![
        // bool travels as uint in native buffers
        ReflectedVariable::scalar("flag", 0, FLAG, ScalarType::UInt),
        ReflectedVariable::scalar("count", 0, COUNT, ScalarType::UInt),
        ReflectedVariable::scalar("bias", 0, BIAS, ScalarType::Int),
        ReflectedVariable::scalar("exposure", 0, EXPOSURE, ScalarType::Float),
        ReflectedVariable::vector("tint", 0, TINT, ScalarType::Float, 3),
        ReflectedVariable::scalar("lit", 0, LIT, ScalarType::Float),
        ReflectedVariable::vector("jitter", 0, JITTER, ScalarType::Float, 2).into_array(3),
    ]
}

fn pixel_reflection() -> StageReflection {
    StageReflection::new(ShaderStage::Pixel)
        .with_constant_buffer("global_cb", 0, offsets::GLOBAL_SIZE, global_variables())
        .with_resource(ReflectedResourceSlot::new(
            "albedo_tex",
            0,
            ResourceKind::Texture(TextureDimension::D2),
        ))
        .with_resource(ReflectedResourceSlot::new("albedo_sampler", 0, ResourceKind::Sampler))
}

fn combined_reflection() -> StageReflection {
    StageReflection::new(ShaderStage::Pixel)
        .with_constant_buffer(
            "global_cb",
            0,
            offsets::GLOBAL_SIZE,
            vec![ReflectedVariable::scalar(
                "exposure",
                0,
                offsets::EXPOSURE,
                ScalarType::Float,
            )],
        )
        .with_resource(ReflectedResourceSlot::new(
            "albedo_tex_albedo_sampler",
            2,
            ResourceKind::CombinedTextureSampler(TextureDimension::D2),
        ))
}

fn legacy_reflection() -> StageReflection {
    pixel_reflection().with_resource(ReflectedResourceSlot::new(
        "shadow_tex",
        1,
        ResourceKind::Texture(TextureDimension::D2),
    ))
}

/// Compiler with fixed reflection for every entry point of the fixture.
pub fn fixture_compiler() -> DummyCompiler {
    DummyCompiler::new()
        .with_stage("DrawVS", vertex_reflection())
        .with_stage("DrawPS", pixel_reflection())
        .with_stage("CombinedPS", combined_reflection())
        .with_stage("LegacyPS", legacy_reflection())
        .with_failure("BrokenPS")
}

pub fn fixture_context() -> DummyContext {
    init_logging();
    DummyContext::with_compiler(Box::new(fixture_compiler()))
}

/// Id of the last constant buffer created with `size` bytes.
pub fn cbuffer_id(ctx: &DummyContext, size: u32) -> u64 {
    ctx.calls()
        .iter()
        .rev()
        .find_map(|call| match call {
            NativeCall::CreateConstantBuffer { id, size: s } if *s == size => Some(*id),
            _ => None,
        })
        .unwrap()
}

pub fn read_u32(bytes: &[u8], offset: u32) -> u32 {
    let start = offset as usize;
    u32::from_ne_bytes(bytes[start..start + 4].try_into().unwrap())
}

pub fn read_f32(bytes: &[u8], offset: u32) -> f32 {
    f32::from_bits(read_u32(bytes, offset))
}

/// GLSL body for the naga-backed tests. Declarations come from the
/// generated header.
pub const GLSL_BODY: &str = r#"
#ifdef KLAYGE_VERTEX_SHADER
layout(location = 0) in vec3 in_pos;
layout(location = 0) out vec2 v_uv;
void LitVS() {
    v_uv = in_pos.xy;
    gl_Position = world * vec4(in_pos, 1.0);
}
#endif

#ifdef KLAYGE_PIXEL_SHADER
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 out_color;
void LitPS() {
    vec4 albedo = texture(sampler2D(albedo_tex, albedo_sampler), v_uv);
    out_color = vec4(albedo.rgb * tint * exposure, 1.0);
}
#endif
"#;

/// Effect whose shader compiles with naga.
pub fn lit_descriptor() -> EffectDescriptor {
    EffectDescriptor {
        name: "lit".into(),
        parameters: vec![
            ParameterDesc::new("world", ParameterType::Float4x4),
            ParameterDesc::new("exposure", ParameterType::Float),
            ParameterDesc::new("tint", ParameterType::Float3),
            ParameterDesc::new("albedo_tex", ParameterType::Texture(TextureDimension::D2)),
            ParameterDesc::new("albedo_sampler", ParameterType::Sampler),
        ],
        cbuffers: vec![CBufferDesc {
            name: "per_object".into(),
            parameters: vec!["world".into()],
        }],
        shader: GLSL_BODY.into(),
        techniques: vec![TechniqueDesc {
            name: "Lit".into(),
            passes: vec![pass("p0", "LitVS", "LitPS")],
            ..Default::default()
        }],
        ..Default::default()
    }
}
