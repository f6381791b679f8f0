//! GLSL generation for effect descriptions.
//!
//! The generated header declares every constant buffer as an std140
//! uniform block without an instance name (members read as plain globals,
//! like HLSL cbuffer members) and every resource parameter in its own
//! descriptor set:
//!
//! | set | contents |
//! |-----|----------|
//! | 0   | constant buffers |
//! | 1   | textures |
//! | 2   | samplers |
//! | 3   | structured/raw buffers |
//!
//! Bindings within a set are the slot numbers the reflection step reports.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::error::GraphicsError;
use crate::types::TextureDimension;

use super::desc::{EffectDescriptor, ParameterDesc};
use super::parameter::ParameterType;

/// Descriptor set holding constant buffers.
pub const CBUFFER_SET: u32 = 0;
/// Descriptor set holding textures.
pub const TEXTURE_SET: u32 = 1;
/// Descriptor set holding samplers.
pub const SAMPLER_SET: u32 = 2;
/// Descriptor set holding structured/raw buffers.
pub const BUFFER_SET: u32 = 3;

fn glsl_type(ty: ParameterType) -> &'static str {
    use ParameterType::*;
    match ty {
        // bool is not host-shareable; it travels as a 32-bit uint.
        Bool | UInt => "uint",
        Int => "int",
        Float => "float",
        UInt2 => "uvec2",
        UInt3 => "uvec3",
        UInt4 => "uvec4",
        Int2 => "ivec2",
        Int3 => "ivec3",
        Int4 => "ivec4",
        Float2 => "vec2",
        Float3 => "vec3",
        Float4 => "vec4",
        Float4x4 => "mat4",
        Texture(dim) => texture_type(dim),
        Sampler => "sampler",
        Buffer => "vec4",
    }
}

fn texture_type(dim: TextureDimension) -> &'static str {
    match dim {
        TextureDimension::D1 => "texture1D",
        TextureDimension::D1Array => "texture1DArray",
        TextureDimension::D2 => "texture2D",
        TextureDimension::D2Array => "texture2DArray",
        TextureDimension::D3 => "texture3D",
        TextureDimension::Cube => "textureCube",
        TextureDimension::CubeArray => "textureCubeArray",
    }
}

fn member(param: &ParameterDesc) -> String {
    match param.array_size {
        Some(n) => format!("    {} {}[{n}];\n", glsl_type(param.ty), param.name),
        None => format!("    {} {};\n", glsl_type(param.ty), param.name),
    }
}

/// Generate the declarations header for `desc`.
pub fn generate_header(desc: &EffectDescriptor) -> String {
    let mut out = String::from("#version 450\n\n");

    for (slot, (name, params)) in desc.constant_buffers().iter().enumerate() {
        let _ = writeln!(
            out,
            "layout(std140, set = {CBUFFER_SET}, binding = {slot}) uniform {name} {{"
        );
        for param in params {
            out.push_str(&member(param));
        }
        out.push_str("};\n\n");
    }

    let mut texture_slot = 0;
    let mut sampler_slot = 0;
    let mut buffer_slot = 0;
    for param in desc.parameters.iter().filter(|p| p.ty.is_resource()) {
        match param.ty {
            ParameterType::Texture(dim) => {
                let _ = writeln!(
                    out,
                    "layout(set = {TEXTURE_SET}, binding = {texture_slot}) uniform {} {};",
                    texture_type(dim),
                    param.name
                );
                texture_slot += 1;
            }
            ParameterType::Sampler => {
                let _ = writeln!(
                    out,
                    "layout(set = {SAMPLER_SET}, binding = {sampler_slot}) uniform sampler {};",
                    param.name
                );
                sampler_slot += 1;
            }
            _ => {
                let _ = writeln!(
                    out,
                    "layout(std430, set = {BUFFER_SET}, binding = {buffer_slot}) readonly buffer {0} {{\n    vec4 {0}_data[];\n}};",
                    param.name
                );
                buffer_slot += 1;
            }
        }
    }

    out
}

/// Expand `#include "name"` directives from `includes`.
///
/// Each include is expanded at most once; a missing include is an error.
pub fn resolve_includes(
    source: &str,
    includes: &HashMap<&str, &str>,
) -> Result<String, GraphicsError> {
    let mut included = HashSet::new();
    resolve_recursive(source, includes, &mut included)
}

fn resolve_recursive<'a>(
    source: &str,
    includes: &HashMap<&'a str, &'a str>,
    included: &mut HashSet<&'a str>,
) -> Result<String, GraphicsError> {
    let mut result = String::with_capacity(source.len());

    for line in source.lines() {
        let Some(path) = parse_include_directive(line.trim()) else {
            result.push_str(line);
            result.push('\n');
            continue;
        };
        let (&key, &text) = includes.get_key_value(path).ok_or_else(|| {
            GraphicsError::EffectParse(format!("include not found: \"{path}\""))
        })?;
        if included.insert(key) {
            result.push_str(&resolve_recursive(text, includes, included)?);
            result.push('\n');
        }
    }

    Ok(result)
}

/// Parse a `#include "path"` or `#include <path>` directive.
fn parse_include_directive(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("#include")?.trim();
    if let Some(inner) = rest.strip_prefix('"') {
        inner.strip_suffix('"')
    } else if let Some(inner) = rest.strip_prefix('<') {
        inner.strip_suffix('>')
    } else {
        None
    }
}

/// Generate the complete GLSL text of an effect: header plus body with
/// includes expanded.
pub fn generate_source(desc: &EffectDescriptor) -> Result<String, GraphicsError> {
    let includes: HashMap<&str, &str> = desc
        .includes
        .iter()
        .map(|(name, text)| (name.as_str(), text.as_str()))
        .collect();
    let body = resolve_includes(&desc.shader, &includes)?;
    let mut source = generate_header(desc);
    source.push('\n');
    source.push_str(&body);
    Ok(source)
}
