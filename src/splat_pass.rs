use std::borrow::Cow;

use crate::buffers::BufferSet;
use crate::sort::SortBuffers;

pub(crate) const SPLAT_WGSL: &str = concat!(include_str!("common.wgsl"), "\n", include_str!("splat.wgsl"));

const SPLAT_GROUP_ID: u32 = 0;
const SORTED_INDICES_GROUP_ID: u32 = 1;
const SETTINGS_GROUP_ID: u32 = 2;

/// Only the vertex stage reads the settings uniform.
pub(crate) const SETTINGS_VISIBILITY: wgpu::ShaderStages = wgpu::ShaderStages::VERTEX;

/// Source-over: colour `src * a + dst * (1 - a)`, alpha `src + dst * (1 - a)`.
pub const SPLAT_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

fn single_buffer_layout(
    device: &wgpu::Device,
    label: &str,
    ty: wgpu::BufferBindingType,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

/// Render stage: one indirect draw of six-vertex quads, instance `i` reading
/// the splat named by the `i`-th sorted index.
pub struct SplatPass {
    pipeline: wgpu::RenderPipeline,
}

impl SplatPass {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let splat_layout = single_buffer_layout(
            device,
            "Splat: Splat Buffer Bind Group Layout",
            wgpu::BufferBindingType::Storage { read_only: true },
            wgpu::ShaderStages::VERTEX,
        );
        let sorted_layout = single_buffer_layout(
            device,
            "Splat: Sorted Indices Bind Group Layout",
            wgpu::BufferBindingType::Storage { read_only: true },
            wgpu::ShaderStages::VERTEX,
        );
        let settings_layout = single_buffer_layout(
            device,
            "Splat: Settings Bind Group Layout",
            wgpu::BufferBindingType::Uniform,
            SETTINGS_VISIBILITY,
        );
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Splat Pipeline Layout"),
            bind_group_layouts: &[&splat_layout, &sorted_layout, &settings_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Splat Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SPLAT_WGSL)),
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Splat Render Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(SPLAT_BLEND),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: Default::default(),
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: Default::default(),
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self { pipeline }
    }
}

pub struct SplatBindings {
    splat_bind_group: wgpu::BindGroup,
    /// One group per ping-pong bank of the sorter, built once.
    bank_bind_groups: [wgpu::BindGroup; 2],
    /// Group for a sorted index buffer outside the sorter's banks.
    foreign: Option<(wgpu::Id<wgpu::Buffer>, wgpu::BindGroup)>,
    /// `None` selects `foreign`.
    active_bank: Option<usize>,
    settings_bind_group: wgpu::BindGroup,
}

impl SplatBindings {
    pub fn new(
        device: &wgpu::Device,
        SplatPass { pipeline }: &SplatPass,
        buffers: &BufferSet,
        sort_buffers: &SortBuffers,
    ) -> Self {
        let splat_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Splat: Splat Buffer Bind Group"),
            layout: &pipeline.get_bind_group_layout(SPLAT_GROUP_ID),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffers.splats.as_entire_binding(),
            }],
        });
        let settings_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Splat: Settings Bind Group"),
            layout: &pipeline.get_bind_group_layout(SETTINGS_GROUP_ID),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffers.settings.as_entire_binding(),
            }],
        });
        let [bank_0, bank_1] = &sort_buffers.ping_pong;
        Self {
            splat_bind_group,
            bank_bind_groups: [
                Self::sorted_indices_bind_group(device, pipeline, &bank_0.indices),
                Self::sorted_indices_bind_group(device, pipeline, &bank_1.indices),
            ],
            foreign: None,
            active_bank: Some(0),
            settings_bind_group,
        }
    }

    fn sorted_indices_bind_group(
        device: &wgpu::Device,
        pipeline: &wgpu::RenderPipeline,
        sorted_indices: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Splat: Sorted Indices Bind Group"),
            layout: &pipeline.get_bind_group_layout(SORTED_INDICES_GROUP_ID),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: sorted_indices.as_entire_binding(),
            }],
        })
    }

    /// Points the draw at `sorted_indices`. A bank of `sort_buffers` reuses its
    /// prebuilt group; any other buffer gets a group of its own, kept until a
    /// different buffer shows up.
    pub fn select_sorted_indices(
        &mut self,
        device: &wgpu::Device,
        SplatPass { pipeline }: &SplatPass,
        sort_buffers: &SortBuffers,
        sorted_indices: &wgpu::Buffer,
    ) {
        self.active_bank = sort_buffers
            .ping_pong
            .iter()
            .position(|bank| std::ptr::eq(&bank.indices, sorted_indices));
        if self.active_bank.is_some() {
            return;
        }

        let id = sorted_indices.global_id();
        let cached = matches!(&self.foreign, Some((foreign_id, _)) if *foreign_id == id);
        if !cached {
            log::debug!("sorted indices live outside the sorter banks; binding them directly");
            self.foreign = Some((
                id,
                Self::sorted_indices_bind_group(device, pipeline, sorted_indices),
            ));
        }
    }

    /// Bank whose prebuilt group the next draw uses, `None` for a foreign buffer.
    pub fn active_bank(&self) -> Option<usize> {
        self.active_bank
    }

    fn sorted_indices(&self) -> &wgpu::BindGroup {
        match (self.active_bank, &self.foreign) {
            (Some(bank), _) => &self.bank_bind_groups[bank],
            (None, Some((_, group))) => group,
            (None, None) => &self.bank_bind_groups[0],
        }
    }
}

impl<'a> SplatPass {
    pub fn record<'pass>(
        &'a self,
        rpass: &mut wgpu::RenderPass<'pass>,
        bindings: &'a SplatBindings,
        indirect_args: &'a wgpu::Buffer,
    ) where
        'a: 'pass,
    {
        rpass.set_pipeline(&self.pipeline);
        rpass.set_bind_group(SPLAT_GROUP_ID, &bindings.splat_bind_group, &[]);
        rpass.set_bind_group(SORTED_INDICES_GROUP_ID, bindings.sorted_indices(), &[]);
        rpass.set_bind_group(SETTINGS_GROUP_ID, &bindings.settings_bind_group, &[]);
        rpass.draw_indirect(indirect_args, 0);
    }
}
