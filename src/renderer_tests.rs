//! End-to-end frames on a real device. Each test returns early when no
//! adapter is available, unless `SPLAT_PIPELINE_REQUIRE_GPU` is set.

use std::cell::Cell;

use cgmath::{point3, Point3};

use crate::bitonic_sort::BitonicSorter;
use crate::buffers::Settings;
use crate::camera::{Camera, CameraBuffer};
use crate::context::GpuContext;
use crate::error::RendererError;
use crate::point_cloud::{GaussianPoint, PointCloud};
use crate::readback;
use crate::renderer::{FrameStats, GaussianRenderer, RendererConfig};
use crate::sort::{DepthSorter, SortBuffers};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 64;
const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// When set, a missing adapter fails the GPU tests instead of skipping them.
const REQUIRE_GPU_VAR: &str = "SPLAT_PIPELINE_REQUIRE_GPU";

fn gpu() -> Option<GpuContext> {
    match GpuContext::new_blocking() {
        Ok(ctx) => Some(ctx),
        Err(err) if std::env::var_os(REQUIRE_GPU_VAR).is_some() => {
            panic!("{REQUIRE_GPU_VAR} is set but no device is available: {err}")
        }
        Err(err) => {
            log::warn!("skipping GPU test: {err}");
            None
        }
    }
}

fn forward_camera(eye: Point3<f32>) -> Camera {
    Camera::looking_at(eye, point3(eye.x, eye.y, eye.z + 1.0))
}

/// Points on the view axis of a camera at the origin, one per depth.
fn axis_points(depths: &[f32]) -> Vec<GaussianPoint> {
    depths
        .iter()
        .map(|&z| GaussianPoint::isotropic([0.0, 0.0, z], 0.8, 0.05))
        .collect()
}

struct Harness<S: DepthSorter = BitonicSorter> {
    ctx: GpuContext,
    camera_buffer: CameraBuffer,
    target: wgpu::Texture,
    view: wgpu::TextureView,
    renderer: GaussianRenderer<S>,
}

impl Harness {
    fn new(points: &[GaussianPoint], camera: &Camera) -> Option<Self> {
        Self::build(points, camera, |ctx, cloud, camera_buffer, config| {
            GaussianRenderer::new(
                ctx.device.clone(),
                ctx.queue.clone(),
                FORMAT,
                cloud,
                camera_buffer,
                config,
            )
        })
    }
}

impl<S: DepthSorter> Harness<S> {
    fn build(
        points: &[GaussianPoint],
        camera: &Camera,
        create: impl FnOnce(
            &GpuContext,
            &PointCloud,
            &wgpu::Buffer,
            RendererConfig,
        ) -> Result<GaussianRenderer<S>, RendererError>,
    ) -> Option<Self> {
        let ctx = gpu()?;
        let colors = vec![[1.0, 0.0, 0.0]; points.len()];
        let cloud = PointCloud::with_colors(&ctx.device, points, &colors).unwrap();
        let camera_buffer = CameraBuffer::new(&ctx.device, camera, WIDTH, HEIGHT);
        let config = RendererConfig {
            viewport: (WIDTH, HEIGHT),
            ..Default::default()
        };
        let renderer = create(&ctx, &cloud, camera_buffer.buffer(), config).unwrap();
        let target = ctx.create_target(WIDTH, HEIGHT, FORMAT);
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        Some(Self {
            ctx,
            camera_buffer,
            target,
            view,
            renderer,
        })
    }

    fn render(&mut self, camera: &Camera) -> FrameStats {
        self.camera_buffer
            .update(&self.ctx.queue, camera, WIDTH, HEIGHT);
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Test Frame Encoder"),
            });
        self.renderer.frame(&mut encoder, &self.view);
        self.ctx.queue.submit(Some(encoder.finish()));
        self.renderer.read_frame_stats().unwrap()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Placement {
    InPlace,
    OtherBank,
    Outside,
}

/// Bitonic sorter that moves its result somewhere else on most frames:
/// left in place, copied to the other bank, or copied to a buffer outside
/// both banks, in rotation.
struct RelocatingSorter {
    inner: BitonicSorter,
    outside: wgpu::Buffer,
    frames: Cell<u32>,
    placement: Cell<Placement>,
}

impl RelocatingSorter {
    fn new(device: &wgpu::Device, capacity: u32) -> Result<Self, RendererError> {
        let inner = BitonicSorter::new(device, capacity)?;
        let outside = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Relocated Sorted Indices"),
            size: inner.buffers().ping_pong[0].indices.size(),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Ok(Self {
            inner,
            outside,
            frames: Cell::new(0),
            placement: Cell::new(Placement::InPlace),
        })
    }

    /// Bank holding the result of the last sort, `None` when it is outside.
    fn result_bank(&self) -> Option<usize> {
        let sorted = self.inner.final_bank();
        match self.placement.get() {
            Placement::InPlace => Some(sorted),
            Placement::OtherBank => Some(1 - sorted),
            Placement::Outside => None,
        }
    }
}

impl DepthSorter for RelocatingSorter {
    fn buffers(&self) -> &SortBuffers {
        self.inner.buffers()
    }

    fn sort(&self, encoder: &mut wgpu::CommandEncoder) {
        self.inner.sort(encoder);
        let frame = self.frames.get();
        self.frames.set(frame + 1);
        let placement = match frame % 3 {
            0 => Placement::InPlace,
            1 => Placement::OtherBank,
            _ => Placement::Outside,
        };

        let banks = &self.inner.buffers().ping_pong;
        let sorted_bank = self.inner.final_bank();
        let sorted = &banks[sorted_bank].indices;
        match placement {
            Placement::InPlace => {}
            Placement::OtherBank => encoder.copy_buffer_to_buffer(
                sorted,
                0,
                &banks[1 - sorted_bank].indices,
                0,
                sorted.size(),
            ),
            Placement::Outside => {
                encoder.copy_buffer_to_buffer(sorted, 0, &self.outside, 0, sorted.size())
            }
        }
        self.placement.set(placement);
    }

    fn final_indices(&self) -> &wgpu::Buffer {
        match self.result_bank() {
            Some(bank) => &self.inner.buffers().ping_pong[bank].indices,
            None => &self.outside,
        }
    }
}

/// Eight points at depths 1..=8 and a camera sequence showing none, half or
/// all of them, with the expected back-to-front order for each frame.
fn visible_count_script() -> (Vec<GaussianPoint>, Vec<(Camera, Vec<u32>)>) {
    let depths: Vec<f32> = (1..=8).map(|d| d as f32).collect();
    let looking_back = Camera::looking_at(point3(0.0, 0.0, 0.0), point3(0.0, 0.0, -1.0));
    let halfway = forward_camera(point3(0.0, 0.0, 4.5));
    let everything = forward_camera(point3(0.0, 0.0, 0.0));
    let none = Vec::new();
    let far_half = vec![7, 6, 5, 4];
    let all: Vec<u32> = (0..8).rev().collect();
    let script = vec![
        (looking_back, none.clone()),
        (halfway, far_half.clone()),
        (everything, all.clone()),
        (halfway, far_half.clone()),
        (looking_back, none),
        (everything, all),
        (halfway, far_half),
    ];
    (axis_points(&depths), script)
}

#[test]
fn test_buffer_sizes_follow_point_count() {
    let depths: Vec<f32> = (1..=10).map(|d| d as f32).collect();
    let Some(harness) = Harness::new(&axis_points(&depths), &forward_camera(point3(0.0, 0.0, 0.0))) else {
        return;
    };
    let buffers = harness.renderer.buffers();
    assert_eq!(buffers.splats.size(), 10 * 48);
    assert_eq!(buffers.indirect_args.size(), 16);
    assert_eq!(buffers.settings.size(), 32);
}

#[test]
fn test_back_to_front_scenario() {
    let camera = forward_camera(point3(0.0, 0.0, 0.0));
    let Some(mut harness) = Harness::new(&axis_points(&[1.0, 3.0, 2.0, 4.0]), &camera) else {
        return;
    };
    for _ in 0..3 {
        let stats = harness.render(&camera);
        assert_eq!(stats.instance_count, 4);
        assert_eq!(stats.visible_count, 4);
        assert_eq!(stats.sorted_indices, vec![3, 1, 2, 0]);
    }
}

#[test]
fn test_instance_count_is_never_stale() {
    let (points, script) = visible_count_script();
    let Some(mut harness) = Harness::new(&points, &script[0].0) else {
        return;
    };
    for (frame, (camera, expected)) in script.iter().enumerate() {
        let stats = harness.render(camera);
        assert_eq!(stats.visible_count, expected.len() as u32, "frame {frame}");
        assert_eq!(stats.instance_count, expected.len() as u32, "frame {frame}");
        assert_eq!(&stats.sorted_indices, expected, "frame {frame}");
        assert_eq!(
            harness.renderer.drawn_bank(),
            Some(harness.renderer.sorter().final_bank()),
            "frame {frame}"
        );
    }
}

#[test]
fn test_draw_follows_final_bank_between_frames() {
    let (points, script) = visible_count_script();
    let Some(mut harness) = Harness::build(&points, &script[0].0, |ctx, cloud, camera_buffer, config| {
        let sorter = RelocatingSorter::new(&ctx.device, cloud.num_points())?;
        GaussianRenderer::with_sorter(
            ctx.device.clone(),
            ctx.queue.clone(),
            FORMAT,
            cloud,
            camera_buffer,
            config,
            sorter,
        )
    }) else {
        return;
    };

    let mut placements = Vec::new();
    for (frame, (camera, expected)) in script.iter().enumerate() {
        let stats = harness.render(camera);
        assert_eq!(stats.instance_count, expected.len() as u32, "frame {frame}");
        assert_eq!(&stats.sorted_indices, expected, "frame {frame}");

        let sorter = harness.renderer.sorter();
        assert_eq!(harness.renderer.drawn_bank(), sorter.result_bank(), "frame {frame}");
        placements.push(sorter.placement.get());
    }
    assert!(placements.contains(&Placement::OtherBank));
    assert!(placements.contains(&Placement::Outside));
}

#[test]
fn test_invisible_points_are_not_drawn() {
    let camera = forward_camera(point3(0.0, 0.0, 0.0));
    let depths = [2.0, -1.0, 3.0, -5.0, 4.0];
    let Some(mut harness) = Harness::new(&axis_points(&depths), &camera) else {
        return;
    };
    let stats = harness.render(&camera);
    assert_eq!(stats.instance_count, 3);
    assert!(stats.instance_count < depths.len() as u32);
    assert_eq!(stats.sorted_indices, vec![4, 2, 0]);
    assert!(!stats.sorted_indices.contains(&1));
    assert!(!stats.sorted_indices.contains(&3));
}

#[test]
fn test_large_cloud_sorted_back_to_front() {
    let camera = forward_camera(point3(0.0, 0.0, 0.0));
    let count = 1000u32;
    let depths: Vec<f32> = (0..count)
        .map(|i| 1.0 + ((i * 37) % count) as f32 * 0.05)
        .collect();
    let points: Vec<GaussianPoint> = depths
        .iter()
        .enumerate()
        .map(|(i, &z)| {
            let x = ((i % 7) as f32 - 3.0) * 0.02 * z;
            GaussianPoint::isotropic([x, 0.0, z], 0.5, 0.01)
        })
        .collect();
    let Some(mut harness) = Harness::new(&points, &camera) else {
        return;
    };
    let stats = harness.render(&camera);
    assert_eq!(stats.instance_count, count);

    let mut seen = vec![false; count as usize];
    for &index in &stats.sorted_indices {
        assert!(!seen[index as usize], "index {index} drawn twice");
        seen[index as usize] = true;
    }
    for pair in stats.sorted_indices.windows(2) {
        assert!(depths[pair[0] as usize] >= depths[pair[1] as usize]);
    }
}

#[test]
fn test_set_scale_is_idempotent() {
    let camera = forward_camera(point3(0.0, 0.0, 0.0));
    let Some(mut harness) = Harness::new(&axis_points(&[1.0, 2.0]), &camera) else {
        return;
    };
    harness.renderer.set_scale(1.5);
    let once = harness.renderer.read_settings().unwrap();
    harness.renderer.set_scale(1.5);
    let twice = harness.renderer.read_settings().unwrap();

    assert_eq!(once, twice);
    assert_eq!(once, Settings::new(1.5, 0, WIDTH, HEIGHT));
    assert_eq!(&once, harness.renderer.settings());
}

#[test]
fn test_scale_does_not_change_visibility_or_order() {
    let camera = forward_camera(point3(0.0, 0.0, 0.0));
    let points = [
        GaussianPoint::isotropic([0.1, 0.0, 1.5], 0.7, 0.05),
        GaussianPoint::isotropic([-0.2, 0.1, 4.0], 0.7, 0.05),
        GaussianPoint::isotropic([0.3, -0.1, 2.5], 0.7, 0.05),
        GaussianPoint::isotropic([0.0, 0.0, -3.0], 0.7, 0.05),
        GaussianPoint::isotropic([-0.1, 0.2, 6.0], 0.7, 0.05),
    ];
    let Some(mut harness) = Harness::new(&points, &camera) else {
        return;
    };
    harness.renderer.set_scale(1.0);
    let unscaled = harness.render(&camera);
    harness.renderer.set_scale(2.0);
    let scaled = harness.render(&camera);

    assert_eq!(unscaled.instance_count, 4);
    assert_eq!(unscaled, scaled);
    assert_eq!(scaled.sorted_indices, vec![4, 1, 2, 0]);
}

#[test]
fn test_splat_reaches_the_target() {
    let camera = forward_camera(point3(0.0, 0.0, 0.0));
    let Some(mut harness) = Harness::new(&axis_points(&[2.0]), &camera) else {
        return;
    };
    harness.render(&camera);
    let pixels =
        readback::read_texture_rgba8(&harness.ctx.device, &harness.ctx.queue, &harness.target)
            .unwrap();
    let center = ((HEIGHT / 2 * WIDTH + WIDTH / 2) * 4) as usize;
    let [r, g, b, a] = [
        pixels[center],
        pixels[center + 1],
        pixels[center + 2],
        pixels[center + 3],
    ];
    assert!(r > 64, "red {r}");
    assert!(g < 16 && b < 16);
    assert!(a > 64);

    // corners stay at the clear colour
    assert_eq!(&pixels[0..4], &[0, 0, 0, 0]);
}

#[test]
fn test_construction_rejects_degenerate_input() {
    let Some(ctx) = gpu() else {
        return;
    };
    assert!(matches!(
        PointCloud::new(&ctx.device, &[], 0, &[]),
        Err(RendererError::EmptyPointCloud)
    ));
    assert!(matches!(
        PointCloud::new(&ctx.device, &axis_points(&[1.0]), 1, &[0.0; 3]),
        Err(RendererError::ShCoefficientMismatch { expected: 12, actual: 3 })
    ));

    let cloud = PointCloud::with_colors(&ctx.device, &axis_points(&[1.0]), &[[1.0; 3]]).unwrap();
    let camera_buffer = CameraBuffer::new(&ctx.device, &forward_camera(point3(0.0, 0.0, 0.0)), 1, 1);
    let result = GaussianRenderer::new(
        ctx.device.clone(),
        ctx.queue.clone(),
        FORMAT,
        &cloud,
        camera_buffer.buffer(),
        RendererConfig {
            viewport: (0, 64),
            ..Default::default()
        },
    );
    assert!(matches!(
        result,
        Err(RendererError::InvalidViewport { width: 0, height: 64 })
    ));
}
