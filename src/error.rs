use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("point cloud is empty; at least one point is required")]
    EmptyPointCloud,
    #[error("buffer '{label}' needs {size} bytes but the device allows at most {limit}")]
    BufferTooLarge {
        label: &'static str,
        size: u64,
        limit: u64,
    },
    #[error("spherical harmonics degree {0} is not supported (max 3)")]
    ShDegreeOutOfRange(u32),
    #[error("expected {expected} spherical harmonics floats, got {actual}")]
    ShCoefficientMismatch { expected: usize, actual: usize },
    #[error("sorter holds {capacity} entries but the point cloud has {points}")]
    SorterTooSmall { capacity: u32, points: u32 },
    #[error("viewport {width}x{height} is empty")]
    InvalidViewport { width: u32, height: u32 },
    #[error("device rejected resource creation: {0}")]
    Device(wgpu::Error),
    #[error("no compatible GPU adapter found")]
    NoAdapter,
    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("failed to map buffer for readback: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),
}

/// Runs `create` between a pair of device error scopes and turns any
/// captured validation or out-of-memory error into `RendererError::Device`.
pub(crate) fn capture_device_errors<T>(
    device: &wgpu::Device,
    create: impl FnOnce() -> Result<T, RendererError>,
) -> Result<T, RendererError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let created = create();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    let created = created?;
    match validation.or(out_of_memory) {
        Some(error) => Err(RendererError::Device(error)),
        None => Ok(created),
    }
}
