//! wgpu implementation of [`ComputeBackend`].
//!
//! Every call that can fail on the device runs inside a validation and an
//! out-of-memory error scope, so an oversized buffer or a rejected copy
//! comes back as a `BackendError` instead of reaching the uncaptured error
//! handler.

use crate::error::BackendError;
use crate::gpu::buffers::{DeviceBuffer, ReadbackBuffer};
use crate::gpu::device::{memory_seed, GpuInfo};
use crate::traits::{ComputeBackend, DeviceInfo};
use log::debug;
use pollster::block_on;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use wgpu::{Adapter, Device, ErrorFilter, Queue};

/// A device and queue opened on one adapter.
pub struct WgpuBackend {
    device: Device,
    queue: Queue,
    info: DeviceInfo,
    readback: Option<ReadbackBuffer>,
    timeout: Duration,
}

impl WgpuBackend {
    /// Opens a device and queue on `adapter`.
    ///
    /// The device is requested with the adapter's own limits so buffers up
    /// to `max_buffer_size` are allowed.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::DeviceRequest` if device creation fails.
    pub fn open(adapter: &Adapter, gpu: &GpuInfo, timeout_secs: u64) -> Result<Self, BackendError> {
        let (device, queue) = block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("vramtest"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
        }))
        .map_err(|e| BackendError::DeviceRequest(e.to_string()))?;

        debug!("Opened {} with timeout {}s", gpu.name, timeout_secs);
        Ok(Self {
            device,
            queue,
            info: DeviceInfo {
                platform_name: gpu.platform_name(),
                device_name: gpu.name.clone(),
                global_memory: memory_seed(gpu.max_buffer_size),
            },
            readback: None,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Runs `op` and returns the first validation or out-of-memory error it
    /// raised.
    fn scoped<T>(&self, op: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        self.device.push_error_scope(ErrorFilter::Validation);
        let value = op();
        let validation = block_on(self.device.pop_error_scope());
        let out_of_memory = block_on(self.device.pop_error_scope());
        (value, validation.or(out_of_memory))
    }

    /// Polls the device until `rx` yields or the timeout passes.
    fn poll_until<T>(&self, rx: &mpsc::Receiver<T>) -> Result<T, BackendError> {
        let start = Instant::now();
        loop {
            let _ = self.device.poll(wgpu::PollType::Poll);

            if let Ok(value) = rx.try_recv() {
                return Ok(value);
            }

            if start.elapsed() > self.timeout {
                return Err(BackendError::Timeout(self.timeout.as_secs()));
            }

            std::thread::yield_now();
        }
    }

    /// Flushes staged writes and blocks until the queue drains.
    fn wait_for_queue(&self) -> Result<(), BackendError> {
        self.queue.submit(std::iter::empty());
        let (tx, rx) = mpsc::channel();
        self.queue.on_submitted_work_done(move || {
            tx.send(()).ok();
        });
        self.poll_until(&rx)
    }

    fn read_into(
        &self,
        readback: &ReadbackBuffer,
        buffer: &DeviceBuffer,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), BackendError> {
        let len = out.len() as u64;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer.buffer(), offset, readback.buffer(), 0, len);

        let (_, error) = self.scoped(|| self.queue.submit(Some(encoder.finish())));
        if let Some(e) = error {
            return Err(BackendError::Transfer {
                op: "read",
                offset,
                reason: e.to_string(),
            });
        }

        let slice = readback.buffer().slice(..len);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        self.poll_until(&rx)?
            .map_err(|e| BackendError::BufferMapping(e.to_string()))?;

        let data = slice.get_mapped_range();
        out.copy_from_slice(&data);
        drop(data);
        readback.buffer().unmap();

        Ok(())
    }
}

impl ComputeBackend for WgpuBackend {
    type Buffer = DeviceBuffer;

    fn device(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_buffer(&mut self, size: u64) -> Result<DeviceBuffer, BackendError> {
        let (buffer, error) = self.scoped(|| DeviceBuffer::create(&self.device, size));
        match error {
            Some(e) => {
                buffer.destroy();
                Err(BackendError::BufferCreation {
                    size,
                    reason: e.to_string(),
                })
            }
            None => Ok(buffer),
        }
    }

    fn write(
        &mut self,
        buffer: &DeviceBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let ((), error) = self.scoped(|| self.queue.write_buffer(buffer.buffer(), offset, data));
        if let Some(e) = error {
            return Err(BackendError::Transfer {
                op: "write",
                offset,
                reason: e.to_string(),
            });
        }
        self.wait_for_queue()
    }

    fn read(
        &mut self,
        buffer: &DeviceBuffer,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), BackendError> {
        let len = out.len() as u64;
        let readback = match self.readback.take() {
            Some(readback) if readback.size() == len => readback,
            _ => ReadbackBuffer::new(&self.device, len),
        };
        let result = self.read_into(&readback, buffer, offset, out);
        self.readback = Some(readback);
        result
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        self.wait_for_queue()
    }

    fn release(&mut self, buffer: DeviceBuffer) {
        debug!("Releasing {} byte device buffer", buffer.size());
        buffer.destroy();
    }
}
