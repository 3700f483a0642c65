use std::time::Instant;

use cgmath::point3;
use splat_pipeline::{
    readback, rgb_to_sh_dc, sh_coefficient_count, Camera, CameraBuffer, GaussianPoint,
    GaussianRenderer, GpuContext, PointCloud, RendererConfig, RendererError,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FRAMES: u32 = 8;
const SH_DEGREE: u32 = 1;
const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Gaussians on a Fibonacci sphere, tinted by position, with a small
/// view-dependent first-degree term.
fn sphere_cloud(count: usize) -> (Vec<GaussianPoint>, Vec<f32>) {
    let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
    let coefficients = sh_coefficient_count(SH_DEGREE);
    let mut points = Vec::with_capacity(count);
    let mut sh = Vec::with_capacity(count * coefficients * 3);
    for i in 0..count {
        let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
        let r = (1.0 - y * y).sqrt();
        let theta = golden * i as f32;
        let position = [r * theta.cos(), y, r * theta.sin()];
        points.push(GaussianPoint::new(
            position,
            0.85,
            [1.0, 0.0, 0.0, 0.0],
            [0.04, 0.04, 0.015],
        ));

        let color = position.map(|c| 0.5 + 0.5 * c);
        sh.extend(color.map(rgb_to_sh_dc));
        for band in 1..coefficients {
            sh.extend([0.1 * position[band - 1]; 3]);
        }
    }
    (points, sh)
}

fn orbit(frame: u32) -> Camera {
    let angle = frame as f32 / FRAMES as f32 * std::f32::consts::TAU;
    Camera::looking_at(
        point3(3.5 * angle.sin(), 0.8, -3.5 * angle.cos()),
        point3(0.0, 0.0, 0.0),
    )
}

fn run() -> Result<(), RendererError> {
    let ctx = GpuContext::new_blocking()?;
    let (points, sh) = sphere_cloud(4096);
    let cloud = PointCloud::new(&ctx.device, &points, SH_DEGREE, &sh)?;

    let camera_buffer = CameraBuffer::new(&ctx.device, &orbit(0), WIDTH, HEIGHT);
    let mut renderer = GaussianRenderer::new(
        ctx.device.clone(),
        ctx.queue.clone(),
        FORMAT,
        &cloud,
        camera_buffer.buffer(),
        RendererConfig {
            viewport: (WIDTH, HEIGHT),
            ..Default::default()
        },
    )?;

    let target = ctx.create_target(WIDTH, HEIGHT, FORMAT);
    let view = target.create_view(&wgpu::TextureViewDescriptor::default());

    for frame in 0..FRAMES {
        let start = Instant::now();
        camera_buffer.update(&ctx.queue, &orbit(frame), WIDTH, HEIGHT);
        renderer.set_scale(if frame % 2 == 0 { 1.0 } else { 1.5 });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        renderer.frame(&mut encoder, &view);
        ctx.queue.submit(Some(encoder.finish()));

        let stats = renderer.read_frame_stats()?;
        let pixels = readback::read_texture_rgba8(&ctx.device, &ctx.queue, &target)?;
        let covered = pixels.chunks_exact(4).filter(|px| px[3] > 0).count();
        log::info!(
            "frame {}: {}/{} splats drawn, {} pixels covered, {:.2?}",
            frame,
            stats.instance_count,
            renderer.point_count(),
            covered,
            start.elapsed()
        );
    }
    Ok(())
}

pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        log::error!("{err}");
        std::process::exit(1);
    }
}
