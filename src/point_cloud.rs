use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::buffers::check_storage_size;
use crate::error::RendererError;

pub const MAX_SH_DEGREE: u32 = 3;

/// One 3D Gaussian as read by the preprocess stage. Values are already
/// activated: opacity in [0, 1], linear scales, unit quaternion.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct GaussianPoint {
    pub position_opacity: [f32; 4],
    /// Quaternion stored as (w, x, y, z).
    pub rotation: [f32; 4],
    pub scale: [f32; 4],
}

impl GaussianPoint {
    pub fn new(position: [f32; 3], opacity: f32, rotation: [f32; 4], scale: [f32; 3]) -> Self {
        Self {
            position_opacity: [position[0], position[1], position[2], opacity],
            rotation,
            scale: [scale[0], scale[1], scale[2], 0.0],
        }
    }

    /// Axis-aligned isotropic Gaussian.
    pub fn isotropic(position: [f32; 3], opacity: f32, radius: f32) -> Self {
        Self::new(position, opacity, [1.0, 0.0, 0.0, 0.0], [radius; 3])
    }

    pub fn position(&self) -> [f32; 3] {
        let [x, y, z, _] = self.position_opacity;
        [x, y, z]
    }
}

pub fn sh_coefficient_count(sh_degree: u32) -> usize {
    ((sh_degree + 1) * (sh_degree + 1)) as usize
}

/// Device-resident point cloud. Immutable once uploaded.
pub struct PointCloud {
    pub gaussians: wgpu::Buffer,
    pub sh_coefficients: wgpu::Buffer,
    num_points: u32,
    sh_degree: u32,
}

impl PointCloud {
    /// Uploads `points` and their SH coefficients, laid out per point as
    /// `(deg + 1)^2` RGB triplets.
    pub fn new(
        device: &wgpu::Device,
        points: &[GaussianPoint],
        sh_degree: u32,
        sh_coefficients: &[f32],
    ) -> Result<Self, RendererError> {
        if points.is_empty() {
            return Err(RendererError::EmptyPointCloud);
        }
        if sh_degree > MAX_SH_DEGREE {
            return Err(RendererError::ShDegreeOutOfRange(sh_degree));
        }
        let expected = points.len() * sh_coefficient_count(sh_degree) * 3;
        if sh_coefficients.len() != expected {
            return Err(RendererError::ShCoefficientMismatch {
                expected,
                actual: sh_coefficients.len(),
            });
        }

        let limits = device.limits();
        check_storage_size(&limits, "gaussians", std::mem::size_of_val(points) as u64)?;
        check_storage_size(
            &limits,
            "sh coefficients",
            std::mem::size_of_val(sh_coefficients) as u64,
        )?;

        let gaussians = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Gaussian 3D Buffer"),
            contents: bytemuck::cast_slice(points),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let sh_coefficients = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Gaussian SH Buffer"),
            contents: bytemuck::cast_slice(sh_coefficients),
            usage: wgpu::BufferUsages::STORAGE,
        });

        Ok(Self {
            gaussians,
            sh_coefficients,
            num_points: points.len() as u32,
            sh_degree,
        })
    }

    /// Degree 0 cloud with one flat colour per point.
    pub fn with_colors(
        device: &wgpu::Device,
        points: &[GaussianPoint],
        colors: &[[f32; 3]],
    ) -> Result<Self, RendererError> {
        let sh: Vec<f32> = colors
            .iter()
            .flat_map(|rgb| rgb.map(rgb_to_sh_dc))
            .collect();
        Self::new(device, points, 0, &sh)
    }

    pub fn num_points(&self) -> u32 {
        self.num_points
    }

    pub fn sh_degree(&self) -> u32 {
        self.sh_degree
    }
}

const SH_C0: f32 = 0.282_094_8;

/// Inverse of the degree-0 SH evaluation: `color = SH_C0 * dc + 0.5`.
pub fn rgb_to_sh_dc(channel: f32) -> f32 {
    (channel - 0.5) / SH_C0
}
