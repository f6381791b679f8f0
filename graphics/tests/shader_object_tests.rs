//! Shader object integration tests.
//!
//! These drive `set_shader` / `bind` / `unbind` / `clone_for` against the
//! recording [`DummyContext`] and check the bytes and native calls that
//! come out.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p klayge-graphics --test shader_object_tests
//! ```

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{
    cbuffer_id, fixture_context, lit_descriptor, material_descriptor, material_effect, offsets,
    read_f32, read_u32, TECHNIQUE,
};
use klayge_core::math::{Float4x4, Vec2, Vec3};
use klayge_graphics::shader::reflection::{ReflectedVariable, StageReflection};
use klayge_graphics::{
    DummyCompiler, DummyContext, Effect, GpuBuffer, GraphicsError, NativeCall, ParameterType,
    RenderContext, SamplerDescriptor, ScalarType, ShaderObject, ShaderObjectState, ShaderSettings,
    ShaderStage, TextureDescriptor, TextureDimension, TextureFormat, UnresolvedPolicy,
};

fn compiled(ctx: &mut DummyContext, effect: &Effect, technique: &str) -> ShaderObject {
    let mut object = ShaderObject::new(ShaderSettings::default());
    object.set_shader(ctx, effect, technique, 0).unwrap();
    object
}

fn uploads_to(ctx: &DummyContext, id: u64) -> usize {
    ctx.calls()
        .iter()
        .filter(|c| matches!(c, NativeCall::UpdateConstantBuffer { id: target, .. } if *target == id))
        .count()
}

// ============================================================================
// Constant buffer contents
// ============================================================================

#[rstest]
#[case::bool("flag", offsets::FLAG, 1)]
#[case::uint("count", offsets::COUNT, 42)]
#[case::int("bias", offsets::BIAS, (-7i32) as u32)]
#[case::float("exposure", offsets::EXPOSURE, 2.5f32.to_bits())]
fn test_scalar_reaches_reflected_offset(
    #[case] name: &str,
    #[case] offset: u32,
    #[case] expected: u32,
) {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);

    let param = fx.parameter_by_name(name).unwrap();
    match param.parameter_type() {
        ParameterType::Bool => param.set(true),
        ParameterType::UInt => param.set(42u32),
        ParameterType::Int => param.set(-7i32),
        _ => param.set(2.5f32),
    }
    .unwrap();
    object.bind(&mut ctx);

    let uploaded = ctx.last_upload(cbuffer_id(&ctx, offsets::GLOBAL_SIZE)).unwrap();
    assert_eq!(read_u32(uploaded, offset), expected);
}

#[test]
fn test_bool_widens_to_float_slot() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);

    fx.parameter_by_name("lit").unwrap().set(true).unwrap();
    object.bind(&mut ctx);
    let cb = object.constant_buffer("global_cb").unwrap();
    assert_eq!(cb.read_f32(offsets::LIT), Some(1.0));

    fx.parameter_by_name("lit").unwrap().set(false).unwrap();
    object.bind(&mut ctx);
    let cb = object.constant_buffer("global_cb").unwrap();
    assert_eq!(cb.read_f32(offsets::LIT), Some(0.0));
}

#[test]
fn test_matrix_is_uploaded_transposed() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);

    let world = Float4x4::from_rows([
        [1.0, 2.0, 3.0, 4.0],
        [5.0, 6.0, 7.0, 8.0],
        [9.0, 10.0, 11.0, 12.0],
        [13.0, 14.0, 15.0, 16.0],
    ]);
    fx.parameter_by_name("world").unwrap().set(world).unwrap();
    object.bind(&mut ctx);

    let uploaded = ctx.last_upload(cbuffer_id(&ctx, 64)).unwrap();
    // First register holds the first column.
    let register0: Vec<f32> = (0..4).map(|i| read_f32(uploaded, i * 4)).collect();
    assert_eq!(register0, vec![1.0, 5.0, 9.0, 13.0]);

    // Column-major reads rebuild the same matrix.
    for row in 0..4u32 {
        for column in 0..4u32 {
            assert_eq!(
                read_f32(uploaded, column * 16 + row * 4),
                world.get(row as usize, column as usize)
            );
        }
    }
}

#[test]
fn test_vector_array_uses_register_stride() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);

    fx.parameter_by_name("jitter")
        .unwrap()
        .set_array(&[Vec2::new(1.0, 2.0), Vec2::new(3.0, 4.0), Vec2::new(5.0, 6.0)])
        .unwrap();
    object.bind(&mut ctx);

    let cb = object.constant_buffer("global_cb").unwrap();
    for (i, expected) in [(1.0f32, 2.0f32), (3.0, 4.0), (5.0, 6.0)].into_iter().enumerate() {
        let base = offsets::JITTER + i as u32 * 16;
        assert_eq!(cb.read_f32(base), Some(expected.0));
        assert_eq!(cb.read_f32(base + 4), Some(expected.1));
        // Padding lanes are not written.
        assert_eq!(cb.read_lane(base + 8), Some(0));
        assert_eq!(cb.read_lane(base + 12), Some(0));
    }
    // Three elements span 48 bytes; the buffer tail stays untouched.
    assert!(cb.data()[(offsets::JITTER + 48) as usize..].iter().all(|b| *b == 0));
}

#[test]
fn test_short_array_writes_only_given_elements() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);

    let jitter = fx.parameter_by_name("jitter").unwrap();
    jitter
        .set_array(&[Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0), Vec2::new(3.0, 3.0)])
        .unwrap();
    object.bind(&mut ctx);
    jitter.set_array(&[Vec2::new(9.0, 9.0)]).unwrap();
    object.bind(&mut ctx);

    let cb = object.constant_buffer("global_cb").unwrap();
    assert_eq!(cb.read_f32(offsets::JITTER), Some(9.0));
    assert_eq!(cb.read_f32(offsets::JITTER + 16), Some(2.0));
    assert_eq!(cb.read_f32(offsets::JITTER + 32), Some(3.0));
}

#[test]
fn test_vector_padding_lane_untouched() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);

    fx.parameter_by_name("lit").unwrap().set(true).unwrap();
    fx.parameter_by_name("tint").unwrap().set(Vec3::new(0.5, 0.25, 0.125)).unwrap();
    object.bind(&mut ctx);

    let cb = object.constant_buffer("global_cb").unwrap();
    assert_eq!(cb.read_f32(offsets::TINT), Some(0.5));
    assert_eq!(cb.read_f32(offsets::TINT + 4), Some(0.25));
    assert_eq!(cb.read_f32(offsets::TINT + 8), Some(0.125));
    // The lane after a float3 belongs to `lit`.
    assert_eq!(cb.read_f32(offsets::LIT), Some(1.0));
}

// ============================================================================
// Dirty tracking and uploads
// ============================================================================

#[test]
fn test_every_bind_uploads_once() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);
    let global = cbuffer_id(&ctx, offsets::GLOBAL_SIZE);

    object.bind(&mut ctx);
    assert!(!object.constant_buffer("global_cb").unwrap().is_dirty());
    assert_eq!(uploads_to(&ctx, global), 1);

    // No value changed; the buffer is still re-marked and re-uploaded.
    object.bind(&mut ctx);
    assert!(!object.constant_buffer("global_cb").unwrap().is_dirty());
    assert_eq!(uploads_to(&ctx, global), 2);
}

#[test]
fn test_bind_call_order() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);
    ctx.clear_calls();

    object.bind(&mut ctx);
    let calls = ctx.take_calls();
    let program_at = calls
        .iter()
        .position(|c| matches!(c, NativeCall::SetProgram { .. }))
        .unwrap();
    assert!(calls[..program_at]
        .iter()
        .all(|c| matches!(c, NativeCall::UpdateConstantBuffer { .. })));
    assert!(calls[program_at + 1..]
        .iter()
        .all(|c| !matches!(c, NativeCall::UpdateConstantBuffer { .. })));
    assert!(calls.iter().any(|c| matches!(
        c,
        NativeCall::SetConstantBuffers { stage: ShaderStage::Vertex, buffers } if buffers.len() == 1
    )));
}

// ============================================================================
// Invalid objects
// ============================================================================

#[test]
fn test_failed_compile_makes_bind_a_no_op() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = ShaderObject::new(ShaderSettings::default());

    let err = object.set_shader(&mut ctx, &fx, "Broken", 0).unwrap_err();
    assert!(matches!(
        err,
        GraphicsError::CompilationFailed { stage: ShaderStage::Pixel, .. }
    ));
    assert_eq!(object.state(), ShaderObjectState::Invalid);
    assert!(!object.is_stage_valid(ShaderStage::Pixel));

    ctx.clear_calls();
    object.bind(&mut ctx);
    object.unbind(&mut ctx);
    assert!(ctx.calls().is_empty());
}

#[test]
fn test_link_failure_is_invalid() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    ctx.set_fail_link(true);
    let mut object = ShaderObject::new(ShaderSettings::default());

    let err = object.set_shader(&mut ctx, &fx, TECHNIQUE, 0).unwrap_err();
    assert!(matches!(err, GraphicsError::LinkFailed(_)));
    assert!(!object.is_valid());
}

#[test]
fn test_shared_buffer_layout_conflict_fails_link() {
    let layout = |stage, offset| {
        StageReflection::new(stage).with_constant_buffer(
            "global_cb",
            0,
            offsets::GLOBAL_SIZE,
            vec![ReflectedVariable::scalar("exposure", 0, offset, ScalarType::Float)],
        )
    };
    let mut ctx = DummyContext::with_compiler(Box::new(
        DummyCompiler::new()
            .with_stage("DrawVS", layout(ShaderStage::Vertex, 0))
            .with_stage("DrawPS", layout(ShaderStage::Pixel, offsets::EXPOSURE)),
    ));
    let fx = material_effect();
    let mut object = ShaderObject::new(ShaderSettings::default());

    let err = object.set_shader(&mut ctx, &fx, TECHNIQUE, 0).unwrap_err();
    assert!(matches!(err, GraphicsError::LinkFailed(_)), "{err:?}");
    assert!(!object.is_valid());
}

#[test]
fn test_unknown_technique_is_invalid() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = ShaderObject::new(ShaderSettings::default());
    assert!(object.set_shader(&mut ctx, &fx, "Missing", 0).is_err());
    assert_eq!(object.state(), ShaderObjectState::Invalid);
}

#[test]
fn test_recompile_recovers_from_invalid() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = ShaderObject::new(ShaderSettings::default());
    assert!(object.set_shader(&mut ctx, &fx, "Broken", 0).is_err());
    object.set_shader(&mut ctx, &fx, TECHNIQUE, 0).unwrap();
    assert!(object.is_valid());
}

#[test]
fn test_texture_dimension_mismatch_is_invalid() {
    let mut desc = material_descriptor();
    let albedo = desc.parameters.iter_mut().find(|p| p.name == "albedo_tex").unwrap();
    albedo.ty = ParameterType::Texture(TextureDimension::Cube);
    let fx = Effect::from_descriptor(desc).unwrap();
    let mut ctx = fixture_context();
    let mut object = ShaderObject::new(ShaderSettings::default());

    let err = object.set_shader(&mut ctx, &fx, TECHNIQUE, 0).unwrap_err();
    match err {
        GraphicsError::TypeMismatch { name, .. } => assert_eq!(name, "albedo_tex"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!object.is_valid());

    // Combined slots check the texture side too.
    assert!(matches!(
        object.set_shader(&mut ctx, &fx, "Combined", 0),
        Err(GraphicsError::TypeMismatch { .. })
    ));
}

// ============================================================================
// Unresolved names
// ============================================================================

#[test]
fn test_unresolved_resource_is_error_by_default() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = ShaderObject::new(ShaderSettings::default());

    let err = object.set_shader(&mut ctx, &fx, "Legacy", 0).unwrap_err();
    match err {
        GraphicsError::UnresolvedParameter { name, stage } => {
            assert_eq!(name, "shadow_tex");
            assert_eq!(stage, ShaderStage::Pixel);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_skip_policy_leaves_slot_empty() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let settings = ShaderSettings::from_toml_str("unresolved = \"skip\"").unwrap();
    assert_eq!(settings.unresolved, UnresolvedPolicy::Skip);
    let mut object = ShaderObject::new(settings);
    object.set_shader(&mut ctx, &fx, "Legacy", 0).unwrap();

    let texture = ctx.create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm)).unwrap();
    fx.parameter_by_name("albedo_tex").unwrap().set_texture(Some(texture.clone())).unwrap();
    ctx.clear_calls();
    object.bind(&mut ctx);

    let textures = ctx.calls().iter().find_map(|c| match c {
        NativeCall::SetTextures { stage: ShaderStage::Pixel, textures } => Some(textures.clone()),
        _ => None,
    });
    assert_eq!(textures, Some(vec![Some(texture.id()), None]));
}

// ============================================================================
// Resources
// ============================================================================

#[test]
fn test_resources_rebound_every_bind() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);

    let texture = ctx.create_texture(&TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm)).unwrap();
    fx.parameter_by_name("albedo_tex").unwrap().set_texture(Some(texture.clone())).unwrap();
    ctx.clear_calls();

    object.bind(&mut ctx);
    object.bind(&mut ctx);

    let texture_binds: Vec<_> = ctx
        .calls()
        .iter()
        .filter_map(|c| match c {
            NativeCall::SetTextures { stage, textures } => Some((*stage, textures.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        texture_binds,
        vec![
            (ShaderStage::Pixel, vec![Some(texture.id())]),
            (ShaderStage::Pixel, vec![Some(texture.id())]),
        ]
    );
}

#[test]
fn test_combined_slot_takes_texture_and_sampler() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, "Combined");

    let texture = ctx.create_texture(&TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm)).unwrap();
    let sampler = ctx.create_sampler(&SamplerDescriptor::linear()).unwrap();
    fx.parameter_by_name("albedo_tex").unwrap().set_texture(Some(texture.clone())).unwrap();
    fx.parameter_by_name("albedo_sampler").unwrap().set_sampler(Some(sampler.clone())).unwrap();
    ctx.clear_calls();
    object.bind(&mut ctx);

    let slots = object.slot_table(ShaderStage::Pixel);
    assert_eq!(slots.textures.len(), 3);
    assert!(slots.textures[2].as_ref().is_some_and(|t| Arc::ptr_eq(t, &texture)));
    assert!(slots.samplers[2].as_ref().is_some_and(|s| Arc::ptr_eq(s, &sampler)));
    assert!(ctx.calls().iter().any(|c| matches!(
        c,
        NativeCall::SetSamplers { stage: ShaderStage::Pixel, samplers }
            if samplers == &vec![None, None, Some(sampler.id())]
    )));
}

#[test]
fn test_unbind_clears_slots() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = compiled(&mut ctx, &fx, TECHNIQUE);

    let texture = ctx.create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm)).unwrap();
    fx.parameter_by_name("albedo_tex").unwrap().set_texture(Some(texture)).unwrap();
    object.bind(&mut ctx);
    ctx.clear_calls();
    object.unbind(&mut ctx);

    for call in ctx.calls() {
        match call {
            NativeCall::SetConstantBuffers { buffers, .. } => {
                assert!(buffers.iter().all(Option::is_none))
            }
            NativeCall::SetTextures { textures, .. } => assert!(textures.iter().all(Option::is_none)),
            NativeCall::SetSamplers { samplers, .. } => assert!(samplers.iter().all(Option::is_none)),
            other => panic!("unexpected call {other:?}"),
        }
    }
    assert!(object.slot_table(ShaderStage::Pixel).textures.iter().all(Option::is_none));
}

// ============================================================================
// Caching and clones
// ============================================================================

#[test]
fn test_same_pass_shares_linked_program() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let first = compiled(&mut ctx, &fx, TECHNIQUE);
    let second = compiled(&mut ctx, &fx, TECHNIQUE);

    assert!(Arc::ptr_eq(first.program().unwrap(), second.program().unwrap()));
    let programs = ctx
        .calls()
        .iter()
        .filter(|c| matches!(c, NativeCall::CreateProgram { .. }))
        .count();
    assert_eq!(programs, 1);
    // Staging is still per object.
    let buffer_id = |object: &ShaderObject| match object.constant_buffer("global_cb").unwrap().gpu_buffer() {
        GpuBuffer::Dummy { id } => *id,
        #[allow(unreachable_patterns)]
        other => panic!("unexpected buffer {other:?}"),
    };
    assert_ne!(buffer_id(&first), buffer_id(&second));
}

#[test]
fn test_shared_vertex_stage_compiles_once() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    compiled(&mut ctx, &fx, TECHNIQUE);
    compiled(&mut ctx, &fx, "Combined");

    let stats = fx.cache().stats();
    assert_eq!(stats.stage_misses, 3);
    assert_eq!(stats.stage_hits, 1);
    assert_eq!(fx.cache().program_count(), 2);
}

#[test]
fn test_clone_has_independent_staging() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut original = compiled(&mut ctx, &fx, TECHNIQUE);

    let fx_clone = fx.clone_instance();
    let mut clone = original.clone_for(&mut ctx, &fx_clone).unwrap();
    assert!(clone.is_valid());

    fx.parameter_by_name("exposure").unwrap().set(1.0f32).unwrap();
    fx_clone.parameter_by_name("exposure").unwrap().set(3.0f32).unwrap();
    original.bind(&mut ctx);
    clone.bind(&mut ctx);

    let read = |object: &ShaderObject| {
        object
            .constant_buffer("global_cb")
            .unwrap()
            .read_f32(offsets::EXPOSURE)
    };
    assert_eq!(read(&original), Some(1.0));
    assert_eq!(read(&clone), Some(3.0));

    fx.parameter_by_name("exposure").unwrap().set(7.0f32).unwrap();
    clone.bind(&mut ctx);
    assert_eq!(read(&clone), Some(3.0));
    original.bind(&mut ctx);
    assert_eq!(read(&original), Some(7.0));
}

#[test]
fn test_clone_of_invalid_object_is_invalid() {
    let fx = material_effect();
    let mut ctx = fixture_context();
    let mut object = ShaderObject::new(ShaderSettings::default());
    assert!(object.set_shader(&mut ctx, &fx, "Broken", 0).is_err());

    let clone = object.clone_for(&mut ctx, &fx.clone_instance()).unwrap();
    assert_eq!(clone.state(), ShaderObjectState::Invalid);
    assert!(clone.constant_buffers().is_empty());
}

// ============================================================================
// naga
// ============================================================================

#[test]
fn test_naga_compiled_effect_binds() {
    common::init_logging();
    let fx = Effect::from_descriptor(lit_descriptor()).unwrap();
    let mut ctx = DummyContext::new();
    let mut object = ShaderObject::new(ShaderSettings::default());
    object.set_shader(&mut ctx, &fx, "Lit", 0).unwrap();
    assert!(object.is_stage_valid(ShaderStage::Vertex));
    assert!(object.is_stage_valid(ShaderStage::Pixel));

    fx.parameter_by_name("exposure").unwrap().set(2.0f32).unwrap();
    fx.parameter_by_name("tint").unwrap().set(Vec3::new(0.5, 0.25, 1.0)).unwrap();
    fx.parameter_by_name("world")
        .unwrap()
        .set(Float4x4::from_rows([
            [1.0, 0.0, 0.0, 10.0],
            [0.0, 1.0, 0.0, 20.0],
            [0.0, 0.0, 1.0, 30.0],
            [0.0, 0.0, 0.0, 1.0],
        ]))
        .unwrap();
    object.bind(&mut ctx);

    // std140: float at 0, vec3 aligned to 16.
    let global = object.constant_buffer("global_cb").unwrap();
    assert_eq!(global.read_f32(0), Some(2.0));
    assert_eq!(global.read_f32(16), Some(0.5));
    assert_eq!(global.read_f32(24), Some(1.0));

    // Translation lives in the last column register.
    let per_object = object.constant_buffer("per_object").unwrap();
    assert_eq!(per_object.read_f32(48), Some(10.0));
    assert_eq!(per_object.read_f32(52), Some(20.0));
    assert_eq!(per_object.read_f32(56), Some(30.0));

    assert_eq!(object.slot_table(ShaderStage::Pixel).textures.len(), 1);
    assert_eq!(object.slot_table(ShaderStage::Pixel).samplers.len(), 1);
}
