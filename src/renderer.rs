use std::sync::Arc;

use crate::bitonic_sort::BitonicSorter;
use crate::buffers::{BufferSet, Settings, INSTANCE_COUNT_OFFSET};
use crate::error::{capture_device_errors, RendererError};
use crate::point_cloud::PointCloud;
use crate::preprocess_pass::{PreprocessBindings, PreprocessPipeline};
use crate::readback;
use crate::sort::{DepthSorter, SORT_COUNT_OFFSET};
use crate::splat_pass::{SplatBindings, SplatPass};

const COUNT_SIZE: u64 = std::mem::size_of::<u32>() as u64;

#[derive(Copy, Clone, Debug)]
pub struct RendererConfig {
    pub viewport: (u32, u32),
    pub gaussian_scale: f32,
    pub clear_color: wgpu::Color,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            viewport: (1280, 720),
            gaussian_scale: 1.0,
            clear_color: wgpu::Color::TRANSPARENT,
        }
    }
}

/// GPU-side results of the last submitted frame, read back for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameStats {
    /// Entries the preprocess stage appended for sorting.
    pub visible_count: u32,
    /// Instance count the indirect draw consumed.
    pub instance_count: u32,
    /// Final sorted indices, `instance_count` of them.
    pub sorted_indices: Vec<u32>,
}

/// Gaussian splat renderer: preprocess, sort and draw, all recorded on one
/// command encoder per frame. The number of drawn splats never leaves the GPU.
pub struct GaussianRenderer<S: DepthSorter = BitonicSorter> {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffers: BufferSet,
    settings: Settings,
    sorter: S,
    preprocess: PreprocessPipeline,
    preprocess_bindings: PreprocessBindings,
    splat_pass: SplatPass,
    splat_bindings: SplatBindings,
    clear_color: wgpu::Color,
}

impl GaussianRenderer<BitonicSorter> {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        format: wgpu::TextureFormat,
        point_cloud: &PointCloud,
        camera_buffer: &wgpu::Buffer,
        config: RendererConfig,
    ) -> Result<Self, RendererError> {
        let sorter = capture_device_errors(&device, || {
            BitonicSorter::new(&device, point_cloud.num_points())
        })?;
        log::info!(
            "bitonic sorter: {} steps, results end in bank {}",
            sorter.schedule().len(),
            sorter.schedule().len() % 2
        );
        Self::with_sorter(device, queue, format, point_cloud, camera_buffer, config, sorter)
    }
}

impl<S: DepthSorter> GaussianRenderer<S> {
    pub fn with_sorter(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        format: wgpu::TextureFormat,
        point_cloud: &PointCloud,
        camera_buffer: &wgpu::Buffer,
        config: RendererConfig,
        sorter: S,
    ) -> Result<Self, RendererError> {
        let num_points = point_cloud.num_points();
        let (width, height) = config.viewport;
        if width == 0 || height == 0 {
            return Err(RendererError::InvalidViewport { width, height });
        }
        let capacity = sorter.buffers().capacity();
        if capacity < num_points {
            return Err(RendererError::SorterTooSmall {
                capacity,
                points: num_points,
            });
        }

        let settings = Settings::new(config.gaussian_scale, point_cloud.sh_degree(), width, height);
        let (buffers, preprocess, preprocess_bindings, splat_pass, splat_bindings) =
            capture_device_errors(&device, || {
                let buffers = BufferSet::allocate(&device, num_points, &settings)?;
                let preprocess = PreprocessPipeline::new(&device);
                let preprocess_bindings = PreprocessBindings::new(
                    &device,
                    &preprocess,
                    camera_buffer,
                    &buffers,
                    point_cloud,
                    sorter.buffers(),
                );
                let splat_pass = SplatPass::new(&device, format);
                let splat_bindings =
                    SplatBindings::new(&device, &splat_pass, &buffers, sorter.buffers());
                Ok((buffers, preprocess, preprocess_bindings, splat_pass, splat_bindings))
            })?;

        log::info!(
            "gaussian renderer ready: {} points, sh degree {}, viewport {}x{}",
            num_points,
            point_cloud.sh_degree(),
            width,
            height
        );

        Ok(Self {
            device,
            queue,
            buffers,
            settings,
            sorter,
            preprocess,
            preprocess_bindings,
            splat_pass,
            splat_bindings,
            clear_color: config.clear_color,
        })
    }

    /// Records one frame into `encoder`, drawing into `output_view`. Call after
    /// the camera buffer and settings have been updated for this frame.
    pub fn frame(&mut self, encoder: &mut wgpu::CommandEncoder, output_view: &wgpu::TextureView) {
        let sort_buffers = self.sorter.buffers();

        sort_buffers.record_reset(encoder);

        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Preprocess Pass"),
                timestamp_writes: None,
            });
            self.preprocess
                .record(&mut cpass, &self.preprocess_bindings, self.buffers.point_count());
        }

        // Visible count -> instance count, device side.
        encoder.copy_buffer_to_buffer(
            &sort_buffers.info,
            SORT_COUNT_OFFSET,
            &self.buffers.indirect_args,
            INSTANCE_COUNT_OFFSET,
            COUNT_SIZE,
        );

        self.sorter.sort(encoder);

        self.splat_bindings.select_sorted_indices(
            &self.device,
            &self.splat_pass,
            sort_buffers,
            self.sorter.final_indices(),
        );
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Gaussian Quad Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.splat_pass
                .record(&mut rpass, &self.splat_bindings, &self.buffers.indirect_args);
        }
    }

    pub fn set_scale(&mut self, value: f32) {
        self.settings.gaussian_scale = value;
        self.buffers.update_scale(&self.queue, value);
    }

    /// Must follow every resize of the output surface.
    pub fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), RendererError> {
        if width == 0 || height == 0 {
            log::warn!("ignoring empty viewport {}x{}", width, height);
            return Err(RendererError::InvalidViewport { width, height });
        }
        self.settings.viewport = [width as f32, height as f32];
        self.buffers.update_viewport(&self.queue, width, height);
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn point_count(&self) -> u32 {
        self.buffers.point_count()
    }

    pub fn buffers(&self) -> &BufferSet {
        &self.buffers
    }

    pub fn sorter(&self) -> &S {
        &self.sorter
    }

    /// Sorter bank the last recorded draw read its indices from, `None` when
    /// the sorter handed back a buffer outside its banks.
    pub fn drawn_bank(&self) -> Option<usize> {
        self.splat_bindings.active_bank()
    }

    /// Blocks until the GPU is idle and reads back the counts and sorted
    /// indices of the last frame. Diagnostics only; `frame` never reads back.
    pub fn read_frame_stats(&self) -> Result<FrameStats, RendererError> {
        let sort_buffers = self.sorter.buffers();
        let visible_count = readback::read_u32s(
            &self.device,
            &self.queue,
            &sort_buffers.info,
            SORT_COUNT_OFFSET,
            1,
        )?[0];
        let instance_count = readback::read_u32s(
            &self.device,
            &self.queue,
            &self.buffers.indirect_args,
            INSTANCE_COUNT_OFFSET,
            1,
        )?[0];
        let sorted_indices = readback::read_u32s(
            &self.device,
            &self.queue,
            self.sorter.final_indices(),
            0,
            instance_count.min(sort_buffers.capacity()) as usize,
        )?;
        Ok(FrameStats {
            visible_count,
            instance_count,
            sorted_indices,
        })
    }

    pub fn read_settings(&self) -> Result<Settings, RendererError> {
        let bytes = readback::read_buffer(
            &self.device,
            &self.queue,
            &self.buffers.settings,
            0,
            std::mem::size_of::<Settings>() as u64,
        )?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }
}
