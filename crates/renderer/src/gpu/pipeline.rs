use std::borrow::Cow;

use accumulate::jitter::DEVICE_BYTES;

use super::scene::SceneBuffers;

/// Format of both accumulation images.
pub(crate) const ACCUMULATION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Binding slots of group 0, shared with every shading program.
pub mod slot {
    pub const UNIFORMS: u32 = 0;
    pub const JITTER: u32 = 1;
    pub const ATTRIBUTES: u32 = 2;
    pub const INDICES: u32 = 3;
    pub const ACCUMULATED: u32 = 4;
    pub const MATERIALS: u32 = 5;
    pub const AABB: u32 = 6;
    pub const PRIMITIVE_IDS: u32 = 7;
    pub const TREE_NODES: u32 = 8;
    pub const SPLIT_PLANES: u32 = 9;
    pub const LIGHT_INDICES: u32 = 10;
}

/// Preview program used when no shader file is configured.
pub const BUILTIN_SHADER: &str = include_str!("preview.wgsl");

pub(crate) struct AccumulationPipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub layout: wgpu::BindGroupLayout,
}

impl AccumulationPipeline {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        source: &str,
        label: &str,
    ) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("accumulation layout"),
            entries: &layout_entries(),
        });
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("accumulation pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("accumulation pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("main_vs"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("main_fs"),
                targets: &[
                    Some(wgpu::ColorTargetState {
                        format: surface_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                    Some(wgpu::ColorTargetState {
                        format: ACCUMULATION_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                ],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        Self { pipeline, layout }
    }

    /// Binds every slot, reading the running average from `accumulated`.
    pub fn bind_group(
        &self,
        device: &wgpu::Device,
        uniforms: &wgpu::Buffer,
        jitter: &wgpu::Buffer,
        scene: &SceneBuffers,
        accumulated: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("accumulation bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: slot::UNIFORMS,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::JITTER,
                    resource: jitter.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::ATTRIBUTES,
                    resource: scene.attributes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::INDICES,
                    resource: scene.indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::ACCUMULATED,
                    resource: wgpu::BindingResource::TextureView(accumulated),
                },
                wgpu::BindGroupEntry {
                    binding: slot::MATERIALS,
                    resource: scene.materials.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::AABB,
                    resource: scene.aabb.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::PRIMITIVE_IDS,
                    resource: scene.primitive_ids.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::TREE_NODES,
                    resource: scene.tree_nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::SPLIT_PLANES,
                    resource: scene.split_planes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slot::LIGHT_INDICES,
                    resource: scene.light_indices.as_entire_binding(),
                },
            ],
        })
    }
}

pub(crate) fn jitter_buffer(device: &wgpu::Device) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("jitter table"),
        size: DEVICE_BYTES as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn layout_entries() -> Vec<wgpu::BindGroupLayoutEntry> {
    let storage = |binding: u32| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    vec![
        wgpu::BindGroupLayoutEntry {
            binding: slot::UNIFORMS,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
        storage(slot::JITTER),
        storage(slot::ATTRIBUTES),
        storage(slot::INDICES),
        wgpu::BindGroupLayoutEntry {
            binding: slot::ACCUMULATED,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        },
        storage(slot::MATERIALS),
        storage(slot::AABB),
        storage(slot::PRIMITIVE_IDS),
        storage(slot::TREE_NODES),
        storage(slot::SPLIT_PLANES),
        storage(slot::LIGHT_INDICES),
    ]
}
