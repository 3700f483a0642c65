use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::RendererError;

/// Bytes per screen-space splat record written by the preprocess stage.
pub const SPLAT_RECORD_SIZE: u64 = std::mem::size_of::<Splat>() as u64;
/// Two triangles per splat quad.
pub const QUAD_VERTEX_COUNT: u32 = 6;
/// Byte offset of `instance_count` inside [`DrawIndirect`].
pub const INSTANCE_COUNT_OFFSET: u64 = 4;

pub(crate) const SETTINGS_SCALE_OFFSET: u64 = 0;
pub(crate) const SETTINGS_VIEWPORT_OFFSET: u64 = 8;

/// Render settings shared by the preprocess and splat stages.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Settings {
    pub gaussian_scale: f32,
    pub sh_degree: u32,
    pub viewport: [f32; 2],
    pub reserved: [u32; 4],
}

impl Settings {
    pub fn new(gaussian_scale: f32, sh_degree: u32, width: u32, height: u32) -> Self {
        Self {
            gaussian_scale,
            sh_degree,
            viewport: [width as f32, height as f32],
            reserved: [0; 4],
        }
    }
}

/// Layout of a non-indexed indirect draw.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirect {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawIndirect {
    /// Worst case: every point visible.
    pub fn for_points(point_count: u32) -> Self {
        Self {
            vertex_count: QUAD_VERTEX_COUNT,
            instance_count: point_count,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

/// Mirror of the WGSL `Splat` record.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Splat {
    /// Projected centre in NDC.
    pub center: [f32; 2],
    /// Half-size of the quad in NDC.
    pub extent: [f32; 2],
    /// Inverse 2D covariance (xx, xy, yy) in pixels, then opacity.
    pub conic_opacity: [f32; 4],
    pub color: [f32; 4],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferSizes {
    pub settings: u64,
    pub indirect_args: u64,
    pub splats: u64,
}

impl BufferSizes {
    pub fn for_point_count(point_count: u32) -> Result<Self, RendererError> {
        if point_count == 0 {
            return Err(RendererError::EmptyPointCloud);
        }
        Ok(Self {
            settings: std::mem::size_of::<Settings>() as u64,
            indirect_args: std::mem::size_of::<DrawIndirect>() as u64,
            splats: point_count as u64 * SPLAT_RECORD_SIZE,
        })
    }
}

pub(crate) fn check_storage_size(
    limits: &wgpu::Limits,
    label: &'static str,
    size: u64,
) -> Result<(), RendererError> {
    let limit = limits
        .max_buffer_size
        .min(limits.max_storage_buffer_binding_size as u64);
    if size > limit {
        return Err(RendererError::BufferTooLarge { label, size, limit });
    }
    Ok(())
}

/// GPU-resident state owned by the renderer: settings, indirect draw
/// arguments and one splat slot per input point.
pub struct BufferSet {
    pub settings: wgpu::Buffer,
    pub indirect_args: wgpu::Buffer,
    pub splats: wgpu::Buffer,
    point_count: u32,
}

impl BufferSet {
    pub fn allocate(
        device: &wgpu::Device,
        point_count: u32,
        settings: &Settings,
    ) -> Result<Self, RendererError> {
        let sizes = BufferSizes::for_point_count(point_count)?;
        check_storage_size(&device.limits(), "gaussian splats", sizes.splats)?;
        log::debug!(
            "allocating buffer set for {} points ({} bytes of splats)",
            point_count,
            sizes.splats
        );

        let settings = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Gaussian Settings Buffer"),
            contents: bytemuck::bytes_of(settings),
            usage: wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });
        let indirect_args = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Gaussian Indirect Args Buffer"),
            contents: bytemuck::bytes_of(&DrawIndirect::for_points(point_count)),
            usage: wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });
        let splats = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Gaussian Splat Buffer"),
            size: sizes.splats,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            settings,
            indirect_args,
            splats,
            point_count,
        })
    }

    pub fn point_count(&self) -> u32 {
        self.point_count
    }

    /// Queues a write of the scale field only; the rest of the settings are untouched.
    pub fn update_scale(&self, queue: &wgpu::Queue, value: f32) {
        queue.write_buffer(&self.settings, SETTINGS_SCALE_OFFSET, bytemuck::bytes_of(&value));
    }

    pub fn update_viewport(&self, queue: &wgpu::Queue, width: u32, height: u32) {
        let viewport = [width as f32, height as f32];
        queue.write_buffer(
            &self.settings,
            SETTINGS_VIEWPORT_OFFSET,
            bytemuck::cast_slice(&viewport),
        );
    }
}
