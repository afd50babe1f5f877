//! GPU buffers used by the wgpu backend.
//!
//! The buffer under test only ever takes copies, so it is created with
//! `COPY_DST | COPY_SRC`. Readback goes through a separate mappable buffer.

use wgpu::{Buffer, BufferUsages, Device};

/// Usage flags of the buffer under test.
pub const TEST_BUFFER_USAGE: BufferUsages = BufferUsages::COPY_DST.union(BufferUsages::COPY_SRC);

/// Usage flags of the readback buffer.
pub const READBACK_BUFFER_USAGE: BufferUsages =
    BufferUsages::MAP_READ.union(BufferUsages::COPY_DST);

/// The VRAM being tested.
pub struct DeviceBuffer {
    buffer: Buffer,
    size: u64,
}

impl DeviceBuffer {
    /// Creates the buffer. Failures surface through the device's error
    /// scopes, not here.
    pub fn create(device: &Device, size: u64) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vram_under_test"),
            size,
            usage: TEST_BUFFER_USAGE,
            mapped_at_creation: false,
        });
        Self { buffer, size }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Frees the device memory now rather than when the handle drops.
    pub fn destroy(self) {
        self.buffer.destroy();
    }
}

/// CPU-mappable buffer one stride long.
pub struct ReadbackBuffer {
    buffer: Buffer,
    size: u64,
}

impl ReadbackBuffer {
    pub fn new(device: &Device, size: u64) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_buffer"),
            size,
            usage: READBACK_BUFFER_USAGE,
            mapped_at_creation: false,
        });
        Self { buffer, size }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}
