//! GPU-driven Gaussian splat rendering: per-frame preprocess, depth sort and
//! indirect draw orchestration on top of `wgpu`.

mod bitonic_sort;
mod buffers;
mod camera;
mod context;
mod error;
mod point_cloud;
mod preprocess_pass;
pub mod readback;
mod renderer;
#[cfg(test)]
mod renderer_tests;
pub mod sort;
mod splat_pass;

pub use wgpu;

pub use bitonic_sort::{bitonic_schedule, BitonicSorter, SortStep};
pub use buffers::{
    BufferSet, BufferSizes, DrawIndirect, Settings, Splat, INSTANCE_COUNT_OFFSET,
    QUAD_VERTEX_COUNT, SPLAT_RECORD_SIZE,
};
pub use camera::{Camera, CameraBuffer, CameraUniform};
pub use context::GpuContext;
pub use error::RendererError;
pub use point_cloud::{rgb_to_sh_dc, sh_coefficient_count, GaussianPoint, PointCloud, MAX_SH_DEGREE};
pub use preprocess_pass::{PreprocessBindings, PreprocessPipeline, PREPROCESS_WORKGROUP_SIZE};
pub use renderer::{FrameStats, GaussianRenderer, RendererConfig};
pub use sort::{depth_key, DepthSorter, KeyIndexBank, SortBuffers};
pub use splat_pass::{SplatBindings, SplatPass, SPLAT_BLEND};
