//! Blocking GPU -> CPU copies for tests and diagnostics. Nothing on the
//! per-frame path calls into this module.

use std::sync::mpsc;

use crate::error::RendererError;

fn map_and_wait(
    device: &wgpu::Device,
    slice: &wgpu::BufferSlice<'_>,
    submission: wgpu::SubmissionIndex,
) -> Result<(), RendererError> {
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    let _ = device.poll(wgpu::Maintain::WaitForSubmissionIndex(submission));
    receiver.recv().unwrap_or(Err(wgpu::BufferAsyncError))?;
    Ok(())
}

pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>, RendererError> {
    if size == 0 {
        return Ok(Vec::new());
    }
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging Buffer"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(source, offset, &staging, 0, size);
    let submission = queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    map_and_wait(device, &slice, submission)?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

pub fn read_u32s(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    offset: u64,
    count: usize,
) -> Result<Vec<u32>, RendererError> {
    let word = std::mem::size_of::<u32>();
    let bytes = read_buffer(device, queue, source, offset, (count * word) as u64)?;
    Ok(bytes
        .chunks_exact(word)
        .map(bytemuck::pod_read_unaligned::<u32>)
        .collect())
}

/// Reads a 4-byte-per-texel 2D texture, returning tightly packed rows.
pub fn read_texture_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> Result<Vec<u8>, RendererError> {
    let (width, height) = (texture.width(), texture.height());
    let row_bytes = width * 4;
    let padded_row_bytes = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Texture Readback Buffer"),
        size: padded_row_bytes as u64 * height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Texture Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_row_bytes),
                rows_per_image: Some(height),
            },
        },
        texture.size(),
    );
    let submission = queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    map_and_wait(device, &slice, submission)?;

    let mut pixels = Vec::with_capacity((row_bytes * height) as usize);
    {
        let mapped = slice.get_mapped_range();
        for row in mapped.chunks_exact(padded_row_bytes as usize) {
            pixels.extend_from_slice(&row[..row_bytes as usize]);
        }
    }
    staging.unmap();
    Ok(pixels)
}
