use std::borrow::Cow;
use std::collections::HashMap;

use crate::buffers::BufferSet;
use crate::point_cloud::PointCloud;
use crate::sort::{SortBuffers, SORT_WORKGROUP_SIZE};

pub const PREPROCESS_WORKGROUP_SIZE: u32 = 256;

pub(crate) const PREPROCESS_WGSL: &str = concat!(include_str!("common.wgsl"), "\n", include_str!("preprocess.wgsl"));

const FRAME_GROUP_ID: u32 = 0;
const CAMERA_BUFFER_IDX: u32 = 0;
const SETTINGS_BUFFER_IDX: u32 = 1;

const POINT_GROUP_ID: u32 = 1;
const GAUSSIAN_BUFFER_IDX: u32 = 0;
const SH_BUFFER_IDX: u32 = 1;
const SPLAT_BUFFER_IDX: u32 = 2;

const SORT_GROUP_ID: u32 = 2;
const SORT_INFO_IDX: u32 = 0;
const SORT_KEYS_IDX: u32 = 1;
const SORT_INDICES_IDX: u32 = 2;
const SORT_DISPATCH_IDX: u32 = 3;

fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

const UNIFORM: wgpu::BufferBindingType = wgpu::BufferBindingType::Uniform;
const STORAGE_READ: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: true };
const STORAGE_WRITE: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: false };

/// Compute stage turning 3D Gaussians into screen-space splats plus
/// unsorted depth keys.
pub struct PreprocessPipeline {
    pipeline: wgpu::ComputePipeline,
}

impl PreprocessPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Preprocess: Frame Bind Group Layout"),
            entries: &[
                buffer_entry(CAMERA_BUFFER_IDX, UNIFORM),
                buffer_entry(SETTINGS_BUFFER_IDX, UNIFORM),
            ],
        });
        let point_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Preprocess: Point Bind Group Layout"),
            entries: &[
                buffer_entry(GAUSSIAN_BUFFER_IDX, STORAGE_READ),
                buffer_entry(SH_BUFFER_IDX, STORAGE_READ),
                buffer_entry(SPLAT_BUFFER_IDX, STORAGE_WRITE),
            ],
        });
        let sort_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Preprocess: Sort Bind Group Layout"),
            entries: &[
                buffer_entry(SORT_INFO_IDX, STORAGE_WRITE),
                buffer_entry(SORT_KEYS_IDX, STORAGE_WRITE),
                buffer_entry(SORT_INDICES_IDX, STORAGE_WRITE),
                buffer_entry(SORT_DISPATCH_IDX, STORAGE_WRITE),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Preprocess Pipeline Layout"),
            bind_group_layouts: &[&frame_layout, &point_layout, &sort_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Preprocess Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(PREPROCESS_WGSL)),
        });
        let constants = HashMap::from([(
            "sort_workgroup_size".to_string(),
            SORT_WORKGROUP_SIZE as f64,
        )]);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Preprocess Pipeline"),
            layout: Some(&layout),
            module: &shader,
            entry_point: Some("preprocess"),
            compilation_options: wgpu::PipelineCompilationOptions {
                constants: &constants,
                ..Default::default()
            },
            cache: None,
        });

        Self { pipeline }
    }
}

/// Bind groups for the preprocess stage. All inputs are fixed for the
/// renderer's lifetime, so these are built once.
pub struct PreprocessBindings {
    frame_bind_group: wgpu::BindGroup,
    point_bind_group: wgpu::BindGroup,
    sort_bind_group: wgpu::BindGroup,
}

impl PreprocessBindings {
    pub fn new(
        device: &wgpu::Device,
        PreprocessPipeline { pipeline }: &PreprocessPipeline,
        camera_buffer: &wgpu::Buffer,
        buffers: &BufferSet,
        point_cloud: &PointCloud,
        sort_buffers: &SortBuffers,
    ) -> Self {
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Preprocess: Frame Bind Group"),
            layout: &pipeline.get_bind_group_layout(FRAME_GROUP_ID),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: CAMERA_BUFFER_IDX,
                    resource: camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: SETTINGS_BUFFER_IDX,
                    resource: buffers.settings.as_entire_binding(),
                },
            ],
        });
        let point_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Preprocess: Point Bind Group"),
            layout: &pipeline.get_bind_group_layout(POINT_GROUP_ID),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: GAUSSIAN_BUFFER_IDX,
                    resource: point_cloud.gaussians.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: SH_BUFFER_IDX,
                    resource: point_cloud.sh_coefficients.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: SPLAT_BUFFER_IDX,
                    resource: buffers.splats.as_entire_binding(),
                },
            ],
        });
        let unsorted = sort_buffers.unsorted();
        let sort_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Preprocess: Sort Bind Group"),
            layout: &pipeline.get_bind_group_layout(SORT_GROUP_ID),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: SORT_INFO_IDX,
                    resource: sort_buffers.info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: SORT_KEYS_IDX,
                    resource: unsorted.keys.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: SORT_INDICES_IDX,
                    resource: unsorted.indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: SORT_DISPATCH_IDX,
                    resource: sort_buffers.dispatch_indirect.as_entire_binding(),
                },
            ],
        });

        Self {
            frame_bind_group,
            point_bind_group,
            sort_bind_group,
        }
    }
}

pub fn workgroup_count(num_points: u32) -> u32 {
    num_points.div_ceil(PREPROCESS_WORKGROUP_SIZE)
}

impl<'a> PreprocessPipeline {
    pub fn record<'pass>(
        &'a self,
        cpass: &mut wgpu::ComputePass<'pass>,
        bindings: &'a PreprocessBindings,
        num_points: u32,
    ) where
        'a: 'pass,
    {
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(FRAME_GROUP_ID, &bindings.frame_bind_group, &[]);
        cpass.set_bind_group(POINT_GROUP_ID, &bindings.point_bind_group, &[]);
        cpass.set_bind_group(SORT_GROUP_ID, &bindings.sort_bind_group, &[]);
        cpass.dispatch_workgroups(workgroup_count(num_points), 1, 1);
    }
}
