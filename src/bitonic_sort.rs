use std::borrow::Cow;
use std::cell::Cell;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::RendererError;
use crate::sort::{DepthSorter, SortBuffers};

pub(crate) const BITONIC_SORT_WGSL: &str = include_str!("bitonic_sort.wgsl");

const PARAMS_GROUP_ID: u32 = 0;
const SORT_INFO_IDX: u32 = 0;
const STEP_PARAMS_IDX: u32 = 1;

const BANK_GROUP_ID: u32 = 1;
const SRC_KEYS_IDX: u32 = 0;
const SRC_INDICES_IDX: u32 = 1;
const DST_KEYS_IDX: u32 = 2;
const DST_INDICES_IDX: u32 = 3;

/// One compare-exchange step: slot `i` is paired with `i ^ partner_mask`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SortStep {
    pub partner_mask: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct StepParams {
    partner_mask: u32,
    _pad: [u32; 3],
}

/// Steps of a bitonic network able to sort `capacity` entries. Each block
/// size starts with a flip (mirror compare) followed by half-cleaners, so
/// every step moves the smaller element of a pair to the lower slot.
pub fn bitonic_schedule(capacity: u32) -> Vec<SortStep> {
    let padded = (capacity.max(1) as u64).next_power_of_two();
    let mut steps = Vec::new();
    let mut block = 2u64;
    while block <= padded {
        steps.push(SortStep {
            partner_mask: (block - 1) as u32,
        });
        let mut distance = block / 4;
        while distance >= 1 {
            steps.push(SortStep {
                partner_mask: distance as u32,
            });
            distance /= 2;
        }
        block *= 2;
    }
    steps
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// GPU bitonic sorter over ping-pong key/index banks. Every step is
/// dispatched indirectly from the workgroup count the preprocess stage
/// accumulates, so only live entries are touched.
pub struct BitonicSorter {
    buffers: SortBuffers,
    pipeline: wgpu::ComputePipeline,
    params_bind_group: wgpu::BindGroup,
    /// `[0]` reads bank 0 and writes bank 1, `[1]` the reverse.
    bank_bind_groups: [wgpu::BindGroup; 2],
    schedule: Vec<SortStep>,
    step_stride: u64,
    final_bank: Cell<usize>,
}

impl BitonicSorter {
    pub fn new(device: &wgpu::Device, capacity: u32) -> Result<Self, RendererError> {
        let buffers = SortBuffers::new(device, capacity)?;
        let schedule = bitonic_schedule(capacity);

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bitonic Sort: Params Bind Group Layout"),
            entries: &[
                storage_entry(SORT_INFO_IDX, true),
                wgpu::BindGroupLayoutEntry {
                    binding: STEP_PARAMS_IDX,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(std::mem::size_of::<StepParams>() as u64),
                    },
                    count: None,
                },
            ],
        });
        let bank_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bitonic Sort: Bank Bind Group Layout"),
            entries: &[
                storage_entry(SRC_KEYS_IDX, true),
                storage_entry(SRC_INDICES_IDX, true),
                storage_entry(DST_KEYS_IDX, false),
                storage_entry(DST_INDICES_IDX, false),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Bitonic Sort Pipeline Layout"),
            bind_group_layouts: &[&params_layout, &bank_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bitonic Sort Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BITONIC_SORT_WGSL)),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Bitonic Sort Step Pipeline"),
            layout: Some(&layout),
            module: &shader,
            entry_point: Some("bitonic_step"),
            compilation_options: Default::default(),
            cache: None,
        });

        // Step parameters never change, so they are written once with one
        // aligned slot per step.
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let param_size = std::mem::size_of::<StepParams>() as u64;
        let step_stride = param_size.div_ceil(alignment) * alignment;
        let mut params = vec![0u8; (step_stride * schedule.len().max(1) as u64) as usize];
        for (i, step) in schedule.iter().enumerate() {
            let start = i * step_stride as usize;
            let value = StepParams {
                partner_mask: step.partner_mask,
                _pad: [0; 3],
            };
            params[start..start + param_size as usize].copy_from_slice(bytemuck::bytes_of(&value));
        }
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bitonic Sort Step Params"),
            contents: &params,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let params_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bitonic Sort: Params Bind Group"),
            layout: &params_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: SORT_INFO_IDX,
                    resource: buffers.info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: STEP_PARAMS_IDX,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &params_buffer,
                        offset: 0,
                        size: NonZeroU64::new(param_size),
                    }),
                },
            ],
        });
        let bank_bind_group = |src: usize, dst: usize, label: &'static str| {
            let src = &buffers.ping_pong[src];
            let dst = &buffers.ping_pong[dst];
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bank_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: SRC_KEYS_IDX,
                        resource: src.keys.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: SRC_INDICES_IDX,
                        resource: src.indices.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: DST_KEYS_IDX,
                        resource: dst.keys.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: DST_INDICES_IDX,
                        resource: dst.indices.as_entire_binding(),
                    },
                ],
            })
        };
        let bank_bind_groups = [
            bank_bind_group(0, 1, "Bitonic Sort: Bank 0 -> 1"),
            bank_bind_group(1, 0, "Bitonic Sort: Bank 1 -> 0"),
        ];

        Ok(Self {
            buffers,
            pipeline,
            params_bind_group,
            bank_bind_groups,
            schedule,
            step_stride,
            final_bank: Cell::new(0),
        })
    }

    pub fn schedule(&self) -> &[SortStep] {
        &self.schedule
    }

    /// Bank that held the result after the most recent [`DepthSorter::sort`].
    pub fn final_bank(&self) -> usize {
        self.final_bank.get()
    }
}

impl DepthSorter for BitonicSorter {
    fn buffers(&self) -> &SortBuffers {
        &self.buffers
    }

    fn sort(&self, encoder: &mut wgpu::CommandEncoder) {
        let mut bank = 0;
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Bitonic Sort Pass"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.pipeline);
            for i in 0..self.schedule.len() {
                let offset = (i as u64 * self.step_stride) as wgpu::DynamicOffset;
                cpass.set_bind_group(PARAMS_GROUP_ID, &self.params_bind_group, &[offset]);
                cpass.set_bind_group(BANK_GROUP_ID, &self.bank_bind_groups[bank], &[]);
                cpass.dispatch_workgroups_indirect(&self.buffers.dispatch_indirect, 0);
                bank ^= 1;
            }
        }
        self.final_bank.set(bank);
    }

    fn final_indices(&self) -> &wgpu::Buffer {
        &self.buffers.ping_pong[self.final_bank.get()].indices
    }
}
