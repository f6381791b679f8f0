//! wgpu render context.
//!
//! Programs are WGSL modules produced by the naga compiler plus a pipeline
//! layout with one bind group per slot namespace (constant buffers,
//! textures, samplers, storage buffers). Binding calls record slot state;
//! [`WgpuContext::bind_groups`] turns the current state into bind groups for
//! the caller's render or compute pass.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::effect::codegen::{BUFFER_SET, CBUFFER_SET, SAMPLER_SET, TEXTURE_SET};
use crate::error::GraphicsError;
use crate::resources::{Buffer, Sampler, Texture};
use crate::shader::compiler::{NagaCompiler, ShaderCompiler};
use crate::shader::reflection::ResourceKind;
use crate::types::{
    AddressMode, BufferDescriptor, BufferUsage, FilterMode, PerStage, SamplerDescriptor,
    ShaderStage, TextureDescriptor, TextureDimension, TextureFormat,
};

use super::{GpuBuffer, GpuProgram, GpuSampler, GpuTexture, ProgramStage, RenderContext};

const SET_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayoutSlot {
    Uniform,
    Texture(wgpu::TextureViewDimension),
    Sampler,
    Storage,
}

impl LayoutSlot {
    fn binding_type(self) -> wgpu::BindingType {
        match self {
            Self::Uniform => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Self::Texture(view_dimension) => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension,
                multisampled: false,
            },
            Self::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            Self::Storage => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        }
    }
}

/// A linked wgpu program.
#[derive(Debug)]
pub struct WgpuProgram {
    modules: Vec<(ShaderStage, wgpu::ShaderModule)>,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    /// Per set: binding -> slot kind.
    slots: [BTreeMap<u32, LayoutSlot>; SET_COUNT],
}

impl WgpuProgram {
    /// Shader module of `stage`; its entry point is `main`.
    pub fn module(&self, stage: ShaderStage) -> Option<&wgpu::ShaderModule> {
        self.modules.iter().find(|(s, _)| *s == stage).map(|(_, m)| m)
    }

    pub fn pipeline_layout(&self) -> &wgpu::PipelineLayout {
        &self.pipeline_layout
    }

    pub fn bind_group_layouts(&self) -> &[wgpu::BindGroupLayout] {
        &self.bind_group_layouts
    }
}

/// Render context backed by a wgpu device.
pub struct WgpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    compiler: NagaCompiler,
    program: Option<Arc<WgpuProgram>>,
    constant_buffers: PerStage<Vec<Option<Arc<wgpu::Buffer>>>>,
    textures: PerStage<Vec<Option<Arc<Texture>>>>,
    samplers: PerStage<Vec<Option<Arc<Sampler>>>>,
    buffers: PerStage<Vec<Option<Arc<Buffer>>>>,
}

impl std::fmt::Debug for WgpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuContext")
            .field("program", &self.program.is_some())
            .finish_non_exhaustive()
    }
}

impl WgpuContext {
    /// Wrap an existing device and queue.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            compiler: NagaCompiler::new(),
            program: None,
            constant_buffers: PerStage::default(),
            textures: PerStage::default(),
            samplers: PerStage::default(),
            buffers: PerStage::default(),
        }
    }

    /// Create a device without a surface.
    pub fn headless() -> Result<Self, GraphicsError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| GraphicsError::ResourceCreationFailed("No compatible GPU adapter".into()))?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("KlayGE Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| GraphicsError::ResourceCreationFailed(format!("Device creation failed: {e}")))?;

        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Program made current by the last `set_program`.
    pub fn current_program(&self) -> Option<&Arc<WgpuProgram>> {
        self.program.as_ref()
    }

    fn first_bound<T: Clone>(slots: &PerStage<Vec<Option<T>>>, binding: u32) -> Option<T> {
        slots
            .iter()
            .find_map(|(_, table)| table.get(binding as usize).cloned().flatten())
    }

    /// Bind groups for the current program, built from the bound slots.
    pub fn bind_groups(&self) -> Result<Vec<wgpu::BindGroup>, GraphicsError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| GraphicsError::InvalidParameter("no program set".into()))?;

        let missing = |set: usize, binding: u32| {
            GraphicsError::InvalidParameter(format!("set {set} binding {binding} has nothing bound"))
        };

        let mut groups = Vec::with_capacity(SET_COUNT);
        for (set, slots) in program.slots.iter().enumerate() {
            let mut buffers = Vec::new();
            let mut views = Vec::new();
            let mut samplers = Vec::new();
            for (&binding, slot) in slots {
                match slot {
                    LayoutSlot::Uniform => {
                        let buffer = Self::first_bound(&self.constant_buffers, binding)
                            .ok_or_else(|| missing(set, binding))?;
                        buffers.push((binding, buffer));
                    }
                    LayoutSlot::Storage => {
                        let buffer = Self::first_bound(&self.buffers, binding)
                            .and_then(|b| match b.gpu_handle() {
                                GpuBuffer::Wgpu(buffer) => Some(buffer.clone()),
                                GpuBuffer::Dummy { .. } => None,
                            })
                            .ok_or_else(|| missing(set, binding))?;
                        buffers.push((binding, buffer));
                    }
                    LayoutSlot::Texture(_) => {
                        let view = Self::first_bound(&self.textures, binding)
                            .and_then(|t| match t.gpu_handle() {
                                GpuTexture::Wgpu { view, .. } => Some(view.clone()),
                                GpuTexture::Dummy => None,
                            })
                            .ok_or_else(|| missing(set, binding))?;
                        views.push((binding, view));
                    }
                    LayoutSlot::Sampler => {
                        let sampler = Self::first_bound(&self.samplers, binding)
                            .and_then(|s| match s.gpu_handle() {
                                GpuSampler::Wgpu(sampler) => Some(sampler.clone()),
                                GpuSampler::Dummy => None,
                            })
                            .ok_or_else(|| missing(set, binding))?;
                        samplers.push((binding, sampler));
                    }
                }
            }

            let mut entries: Vec<wgpu::BindGroupEntry<'_>> = Vec::new();
            entries.extend(buffers.iter().map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            }));
            entries.extend(views.iter().map(|(binding, view)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            }));
            entries.extend(samplers.iter().map(|(binding, sampler)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            }));

            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("KlayGE shader object"),
                layout: &program.bind_group_layouts[set],
                entries: &entries,
            }));
        }
        Ok(groups)
    }
}

impl RenderContext for WgpuContext {
    fn name(&self) -> &'static str {
        "wgpu Context"
    }

    fn compiler(&self) -> &dyn ShaderCompiler {
        &self.compiler
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<Arc<Texture>, GraphicsError> {
        let view_dimension = convert_view_dimension(descriptor.dimension)?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: descriptor.depth_or_layers,
            },
            mip_level_count: descriptor.mip_level_count,
            sample_count: 1,
            dimension: convert_texture_dimension(descriptor.dimension),
            format: convert_texture_format(descriptor.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(view_dimension),
            ..Default::default()
        });
        Ok(Arc::new(Texture::new(
            descriptor.clone(),
            GpuTexture::Wgpu {
                texture: Arc::new(texture),
                view: Arc::new(view),
            },
        )))
    }

    fn create_sampler(&mut self, descriptor: &SamplerDescriptor) -> Result<Arc<Sampler>, GraphicsError> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: descriptor.label.as_deref(),
            address_mode_u: convert_address_mode(descriptor.address_mode_u),
            address_mode_v: convert_address_mode(descriptor.address_mode_v),
            address_mode_w: convert_address_mode(descriptor.address_mode_w),
            mag_filter: convert_filter_mode(descriptor.mag_filter),
            min_filter: convert_filter_mode(descriptor.min_filter),
            mipmap_filter: convert_filter_mode(descriptor.mipmap_filter),
            ..Default::default()
        });
        Ok(Arc::new(Sampler::new(
            descriptor.clone(),
            GpuSampler::Wgpu(Arc::new(sampler)),
        )))
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<Arc<Buffer>, GraphicsError> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: descriptor.size,
            usage: convert_buffer_usage(descriptor.usage),
            mapped_at_creation: false,
        });
        Ok(Arc::new(Buffer::new(
            descriptor.clone(),
            GpuBuffer::Wgpu(Arc::new(buffer)),
        )))
    }

    fn create_constant_buffer(&mut self, label: &str, size: u32) -> Result<GpuBuffer, GraphicsError> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: u64::from(size),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(GpuBuffer::Wgpu(Arc::new(buffer)))
    }

    fn update_constant_buffer(&mut self, buffer: &GpuBuffer, data: &[u8]) {
        if let GpuBuffer::Wgpu(buffer) = buffer {
            self.queue.write_buffer(buffer, 0, data);
        }
    }

    fn create_program(&mut self, stages: &[ProgramStage<'_>]) -> Result<GpuProgram, GraphicsError> {
        let mut slots: [BTreeMap<u32, LayoutSlot>; SET_COUNT] = Default::default();
        let mut visibility: [BTreeMap<u32, wgpu::ShaderStages>; SET_COUNT] = Default::default();
        let mut modules = Vec::with_capacity(stages.len());

        for stage in stages {
            let flags = convert_stage(stage.stage)?;
            let mut add = |set: u32, binding: u32, slot: LayoutSlot| -> Result<(), GraphicsError> {
                let set = set as usize;
                match slots[set].insert(binding, slot) {
                    Some(previous) if previous != slot => {
                        return Err(GraphicsError::LinkFailed(format!(
                            "set {set} binding {binding} is {previous:?} in one stage and {slot:?} in another"
                        )));
                    }
                    _ => {}
                }
                *visibility[set].entry(binding).or_insert(wgpu::ShaderStages::NONE) |= flags;
                Ok(())
            };

            for cb in &stage.reflection.constant_buffers {
                add(CBUFFER_SET, cb.slot, LayoutSlot::Uniform)?;
            }
            for resource in &stage.reflection.resources {
                match resource.kind {
                    ResourceKind::Texture(dim) | ResourceKind::CombinedTextureSampler(dim) => {
                        add(TEXTURE_SET, resource.slot, LayoutSlot::Texture(convert_view_dimension(dim)?))?;
                    }
                    ResourceKind::Sampler => add(SAMPLER_SET, resource.slot, LayoutSlot::Sampler)?,
                    ResourceKind::Buffer => add(BUFFER_SET, resource.slot, LayoutSlot::Storage)?,
                }
            }

            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(stage.compiled.entry_point()),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(stage.compiled.code())),
            });
            modules.push((stage.stage, module));
        }

        let bind_group_layouts: Vec<wgpu::BindGroupLayout> = (0..SET_COUNT)
            .map(|set| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = slots[set]
                    .iter()
                    .map(|(&binding, slot)| wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility: visibility[set][&binding],
                        ty: slot.binding_type(),
                        count: None,
                    })
                    .collect();
                self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: None,
                    entries: &entries,
                })
            })
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = bind_group_layouts.iter().collect();
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

        log::debug!(
            "wgpu: linked program with {} stages, {} bindings",
            modules.len(),
            slots.iter().map(BTreeMap::len).sum::<usize>()
        );

        Ok(GpuProgram::Wgpu(Arc::new(WgpuProgram {
            modules,
            bind_group_layouts,
            pipeline_layout,
            slots,
        })))
    }

    fn set_program(&mut self, program: &GpuProgram) {
        match program {
            GpuProgram::Wgpu(program) => self.program = Some(program.clone()),
            GpuProgram::Dummy { .. } => {
                log::warn!("wgpu: ignoring dummy program");
                self.program = None;
            }
        }
    }

    fn set_constant_buffers(&mut self, stage: ShaderStage, buffers: &[Option<&GpuBuffer>]) {
        self.constant_buffers[stage] = buffers
            .iter()
            .map(|b| match b {
                Some(GpuBuffer::Wgpu(buffer)) => Some(buffer.clone()),
                _ => None,
            })
            .collect();
    }

    fn set_textures(&mut self, stage: ShaderStage, textures: &[Option<Arc<Texture>>]) {
        self.textures[stage] = textures.to_vec();
    }

    fn set_samplers(&mut self, stage: ShaderStage, samplers: &[Option<Arc<Sampler>>]) {
        self.samplers[stage] = samplers.to_vec();
    }

    fn set_buffers(&mut self, stage: ShaderStage, buffers: &[Option<Arc<Buffer>>]) {
        self.buffers[stage] = buffers.to_vec();
    }
}

fn convert_stage(stage: ShaderStage) -> Result<wgpu::ShaderStages, GraphicsError> {
    match stage {
        ShaderStage::Vertex => Ok(wgpu::ShaderStages::VERTEX),
        ShaderStage::Pixel => Ok(wgpu::ShaderStages::FRAGMENT),
        ShaderStage::Compute => Ok(wgpu::ShaderStages::COMPUTE),
        other => Err(GraphicsError::FeatureNotSupported(format!(
            "wgpu has no {other} stage"
        ))),
    }
}

fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut result = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::UNIFORM) {
        result |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= wgpu::BufferUsages::COPY_DST;
    }
    result
}

fn convert_texture_dimension(dim: TextureDimension) -> wgpu::TextureDimension {
    match dim {
        TextureDimension::D1 | TextureDimension::D1Array => wgpu::TextureDimension::D1,
        TextureDimension::D3 => wgpu::TextureDimension::D3,
        TextureDimension::D2
        | TextureDimension::D2Array
        | TextureDimension::Cube
        | TextureDimension::CubeArray => wgpu::TextureDimension::D2,
    }
}

fn convert_view_dimension(dim: TextureDimension) -> Result<wgpu::TextureViewDimension, GraphicsError> {
    match dim {
        TextureDimension::D1 => Ok(wgpu::TextureViewDimension::D1),
        TextureDimension::D2 => Ok(wgpu::TextureViewDimension::D2),
        TextureDimension::D2Array => Ok(wgpu::TextureViewDimension::D2Array),
        TextureDimension::D3 => Ok(wgpu::TextureViewDimension::D3),
        TextureDimension::Cube => Ok(wgpu::TextureViewDimension::Cube),
        TextureDimension::CubeArray => Ok(wgpu::TextureViewDimension::CubeArray),
        TextureDimension::D1Array => Err(GraphicsError::FeatureNotSupported(
            "wgpu has no 1D array textures".into(),
        )),
    }
}

fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
    }
}

fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_conversion() {
        assert_eq!(convert_stage(ShaderStage::Pixel).unwrap(), wgpu::ShaderStages::FRAGMENT);
        assert!(convert_stage(ShaderStage::Hull).is_err());
    }

    #[test]
    fn test_view_dimension_conversion() {
        assert_eq!(
            convert_view_dimension(TextureDimension::Cube).unwrap(),
            wgpu::TextureViewDimension::Cube
        );
        assert!(convert_view_dimension(TextureDimension::D1Array).is_err());
        assert_eq!(convert_texture_dimension(TextureDimension::CubeArray), wgpu::TextureDimension::D2);
    }

    #[test]
    fn test_buffer_usage_conversion() {
        let usage = convert_buffer_usage(BufferUsage::STORAGE | BufferUsage::COPY_DST);
        assert_eq!(usage, wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST);
    }
}
