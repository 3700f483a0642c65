use bytemuck::{Pod, Zeroable};
use cgmath::{Matrix4, Point3, Rad, SquareMatrix, Vector3};
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub view_inv: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub proj_inv: [[f32; 4]; 4],
    /// Focal length in pixels.
    pub focal: [f32; 2],
    pub _pad: [f32; 2],
}

/// Pinhole camera. View space is left-handed with the camera looking down
/// +z, so `clip.w` equals the view-space depth of a point.
#[derive(Copy, Clone, Debug)]
pub struct Camera {
    pub eye: Point3<f32>,
    pub target: Point3<f32>,
    pub up: Vector3<f32>,
    pub fovy: Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
}

impl Camera {
    pub fn looking_at(eye: Point3<f32>, target: Point3<f32>) -> Self {
        Self {
            eye,
            target,
            up: Vector3::unit_y(),
            fovy: Rad(std::f32::consts::FRAC_PI_3),
            znear: 0.1,
            zfar: 100.0,
        }
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_lh(self.eye, self.target, self.up)
    }

    /// Perspective projection with depth mapped to [0, 1].
    pub fn projection_matrix(&self, aspect: f32) -> Matrix4<f32> {
        let f = 1.0 / (self.fovy.0 * 0.5).tan();
        let range = self.zfar / (self.zfar - self.znear);
        #[rustfmt::skip]
        let proj = Matrix4::new(
            f / aspect, 0.0, 0.0, 0.0,
            0.0, f, 0.0, 0.0,
            0.0, 0.0, range, 1.0,
            0.0, 0.0, -self.znear * range, 0.0,
        );
        proj
    }

    pub fn focal(&self, height: u32) -> [f32; 2] {
        let f = height as f32 / (2.0 * (self.fovy.0 * 0.5).tan());
        [f, f]
    }

    pub fn uniform(&self, width: u32, height: u32) -> CameraUniform {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let view = self.view_matrix();
        let proj = self.projection_matrix(aspect);
        CameraUniform {
            view: view.into(),
            view_inv: view.invert().unwrap_or_else(Matrix4::identity).into(),
            proj: proj.into(),
            proj_inv: proj.invert().unwrap_or_else(Matrix4::identity).into(),
            focal: self.focal(height),
            _pad: [0.0; 2],
        }
    }
}

/// Uniform buffer holding the current [`CameraUniform`]. The renderer only
/// binds it; updates come from whoever drives the camera.
pub struct CameraBuffer {
    buffer: wgpu::Buffer,
}

impl CameraBuffer {
    pub fn new(device: &wgpu::Device, camera: &Camera, width: u32, height: u32) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Uniform Buffer"),
            contents: bytemuck::bytes_of(&camera.uniform(width, height)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        Self { buffer }
    }

    pub fn update(&self, queue: &wgpu::Queue, camera: &Camera, width: u32, height: u32) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(&camera.uniform(width, height)));
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}
