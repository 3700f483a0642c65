//! Contract between the frame orchestrator and a GPU depth sorter.
//!
//! The preprocess stage appends `(key, index)` pairs into bank 0 of the
//! sorter's ping-pong set and bumps the counter in the info buffer. The sorter
//! then orders the first `count` pairs by key ascending and reports which bank
//! holds the result. Keys come from [`depth_key`], so ascending order is
//! back-to-front.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::buffers::check_storage_size;
use crate::error::RendererError;

/// Workgroup size of every sort pass. The preprocess stage bumps the
/// dispatch-indirect `x` once per started group of this many keys.
pub const SORT_WORKGROUP_SIZE: u32 = 256;

/// Reserved key that no visible point can produce.
pub const SENTINEL_KEY: u32 = u32::MAX;

/// Sort key for a point at view-space depth `depth` (> 0). Larger depth gives a
/// smaller key, so an ascending sort puts far points first.
pub fn depth_key(depth: f32) -> u32 {
    !depth.to_bits()
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SortInfo {
    pub count: u32,
    pub _pad: [u32; 3],
}

/// `wgpu` dispatch-indirect layout.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirect {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// Byte offset of the valid-entry counter in the info buffer.
pub const SORT_COUNT_OFFSET: u64 = 0;

pub struct KeyIndexBank {
    pub keys: wgpu::Buffer,
    pub indices: wgpu::Buffer,
}

/// Buffers a sorter exposes to the core.
pub struct SortBuffers {
    pub info: wgpu::Buffer,
    pub dispatch_indirect: wgpu::Buffer,
    pub ping_pong: [KeyIndexBank; 2],
    capacity: u32,
}

impl SortBuffers {
    pub fn new(device: &wgpu::Device, capacity: u32) -> Result<Self, RendererError> {
        if capacity == 0 {
            return Err(RendererError::EmptyPointCloud);
        }
        let bank_size = capacity as u64 * std::mem::size_of::<u32>() as u64;
        check_storage_size(&device.limits(), "sort keys", bank_size)?;

        let info = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sort Info Buffer"),
            contents: bytemuck::bytes_of(&SortInfo::default()),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });
        let dispatch_indirect = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sort Dispatch Indirect Buffer"),
            contents: bytemuck::bytes_of(&DispatchIndirect { x: 0, y: 1, z: 1 }),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });
        let bank = |name_keys: &'static str, name_indices: &'static str| KeyIndexBank {
            keys: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(name_keys),
                size: bank_size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            indices: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(name_indices),
                size: bank_size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        };
        let ping_pong = [
            bank("Sort Keys Buffer 0", "Sort Indices Buffer 0"),
            bank("Sort Keys Buffer 1", "Sort Indices Buffer 1"),
        ];

        Ok(Self {
            info,
            dispatch_indirect,
            ping_pong,
            capacity,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bank the preprocess stage writes into.
    pub fn unsorted(&self) -> &KeyIndexBank {
        &self.ping_pong[0]
    }

    /// Zeroes the entry counter and the dispatch `x`, recorded on `encoder`
    /// so it lands before any stage recorded after it.
    pub fn record_reset(&self, encoder: &mut wgpu::CommandEncoder) {
        let word = std::mem::size_of::<u32>() as u64;
        encoder.clear_buffer(&self.info, SORT_COUNT_OFFSET, Some(word));
        encoder.clear_buffer(&self.dispatch_indirect, 0, Some(word));
    }
}

/// A GPU sorter fed by the preprocess stage.
pub trait DepthSorter {
    fn buffers(&self) -> &SortBuffers;

    /// Records every pass needed to order the `count` entries in the info buffer.
    fn sort(&self, encoder: &mut wgpu::CommandEncoder);

    /// Index buffer of the bank holding the result of the last [`sort`](Self::sort).
    /// May differ between frames; callers must not cache it.
    fn final_indices(&self) -> &wgpu::Buffer;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_farther_sorts_first() {
        let depths = [0.01f32, 0.5, 1.0, 2.0, 3.5, 100.0, 1.0e6];
        for pair in depths.windows(2) {
            assert!(depth_key(pair[1]) < depth_key(pair[0]));
        }
    }

    #[test]
    fn test_visible_keys_never_hit_sentinel() {
        assert_ne!(depth_key(f32::MIN_POSITIVE), SENTINEL_KEY);
        assert_ne!(depth_key(f32::MAX), SENTINEL_KEY);
    }

    #[test]
    fn test_layouts() {
        assert_eq!(std::mem::size_of::<SortInfo>(), 16);
        assert_eq!(std::mem::size_of::<DispatchIndirect>(), 12);
    }
}
