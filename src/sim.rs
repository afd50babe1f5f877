//! In-memory backend used by the test suite.
//!
//! Device memory is sparse: only the ranges that were written are stored,
//! so a "256 MB" buffer costs nothing until strides land in it. Writes of a
//! single repeated byte are kept as that byte.

use std::collections::{HashMap, HashSet};

use crate::error::BackendError;
use crate::patterns::Pattern;
use crate::traits::{ComputeBackend, DeviceInfo, ProgressSink};

#[derive(Debug)]
enum Stored {
    Fill(u8, usize),
    Bytes(Vec<u8>),
}

impl Stored {
    fn new(data: &[u8]) -> Self {
        match data.split_first() {
            Some((&first, rest)) if rest.iter().all(|&b| b == first) => {
                Stored::Fill(first, data.len())
            }
            _ => Stored::Bytes(data.to_vec()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Stored::Fill(_, len) => *len,
            Stored::Bytes(bytes) => bytes.len(),
        }
    }

    fn copy_to(&self, out: &mut [u8]) {
        match self {
            Stored::Fill(byte, _) => out.fill(*byte),
            Stored::Bytes(bytes) => out.copy_from_slice(bytes),
        }
    }
}

#[derive(Debug)]
pub struct SimBuffer {
    id: u64,
    size: u64,
}

/// A backend that stores writes on the host and can be told to misbehave.
#[derive(Debug)]
pub struct SimulatedBackend {
    device: DeviceInfo,
    accept_limit: u64,
    create_limit: Option<u64>,
    corrupt_byte: Option<u64>,
    fail_read_at: Option<u64>,
    drop_reads: bool,
    fail_finish: bool,
    next_id: u64,
    live: HashSet<u64>,
    memory: HashMap<(u64, u64), Stored>,
    /// Sizes passed to `create_buffer`, in call order.
    pub created: Vec<u64>,
    /// Sizes of released buffers, in call order.
    pub released: Vec<u64>,
    /// Offsets of every write, in call order.
    pub writes: Vec<u64>,
    /// Offsets of every read, in call order.
    pub reads: Vec<u64>,
    pub finishes: u64,
}

impl SimulatedBackend {
    /// A healthy device reporting `global_memory` bytes, all of it usable.
    pub fn new(global_memory: u64) -> Self {
        Self {
            device: DeviceInfo {
                platform_name: "Simulated Platform".to_string(),
                device_name: "Simulated GPU".to_string(),
                global_memory,
            },
            accept_limit: global_memory,
            create_limit: None,
            corrupt_byte: None,
            fail_read_at: None,
            drop_reads: false,
            fail_finish: false,
            next_id: 0,
            live: HashSet::new(),
            memory: HashMap::new(),
            created: Vec::new(),
            released: Vec::new(),
            writes: Vec::new(),
            reads: Vec::new(),
            finishes: 0,
        }
    }

    /// Buffers larger than `limit` are created but fail their first write.
    pub fn accept_up_to(mut self, limit: u64) -> Self {
        self.accept_limit = limit;
        self
    }

    /// Buffers larger than `limit` fail at creation.
    pub fn reject_create_above(mut self, limit: u64) -> Self {
        self.create_limit = Some(limit);
        self
    }

    /// Flips the lowest bit of the byte at `offset` on every readback.
    pub fn corrupt_byte_at(mut self, offset: u64) -> Self {
        self.corrupt_byte = Some(offset);
        self
    }

    /// Reads starting at `offset` fail.
    pub fn fail_read_at(mut self, offset: u64) -> Self {
        self.fail_read_at = Some(offset);
        self
    }

    /// Reads report success without touching the host buffer.
    pub fn drop_reads(mut self) -> Self {
        self.drop_reads = true;
        self
    }

    /// Every `finish` times out, as on a hung device.
    pub fn fail_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    /// Number of buffers created and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.live.len()
    }

    fn check_range(
        buffer: &SimBuffer,
        op: &'static str,
        offset: u64,
        len: usize,
    ) -> Result<(), BackendError> {
        if offset + len as u64 > buffer.size {
            return Err(BackendError::Transfer {
                op,
                offset,
                reason: format!("range exceeds buffer of {} bytes", buffer.size),
            });
        }
        Ok(())
    }
}

impl ComputeBackend for SimulatedBackend {
    type Buffer = SimBuffer;

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn create_buffer(&mut self, size: u64) -> Result<SimBuffer, BackendError> {
        self.created.push(size);
        if self.create_limit.is_some_and(|limit| size > limit) {
            return Err(BackendError::BufferCreation {
                size,
                reason: "out of device memory".into(),
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id);
        Ok(SimBuffer { id, size })
    }

    fn write(
        &mut self,
        buffer: &SimBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        self.writes.push(offset);
        if buffer.size > self.accept_limit {
            return Err(BackendError::Transfer {
                op: "write",
                offset,
                reason: "out of resources".into(),
            });
        }
        Self::check_range(buffer, "write", offset, data.len())?;
        self.memory.insert((buffer.id, offset), Stored::new(data));
        Ok(())
    }

    fn read(
        &mut self,
        buffer: &SimBuffer,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), BackendError> {
        self.reads.push(offset);
        if self.fail_read_at == Some(offset) {
            return Err(BackendError::Transfer {
                op: "read",
                offset,
                reason: "device lost".into(),
            });
        }
        Self::check_range(buffer, "read", offset, out.len())?;
        if self.drop_reads {
            return Ok(());
        }

        match self.memory.get(&(buffer.id, offset)) {
            Some(stored) if stored.len() == out.len() => stored.copy_to(out),
            _ => out.fill(0),
        }

        if let Some(bad) = self.corrupt_byte {
            if (offset..offset + out.len() as u64).contains(&bad) {
                out[(bad - offset) as usize] ^= 0x01;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        self.finishes += 1;
        if self.fail_finish {
            return Err(BackendError::Timeout(30));
        }
        Ok(())
    }

    fn release(&mut self, buffer: SimBuffer) {
        self.live.remove(&buffer.id);
        self.released.push(buffer.size);
    }
}

/// A progress sink that remembers everything it was told.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub devices: Vec<String>,
    pub reports: Vec<(f64, Pattern)>,
    pub attempts: Vec<u64>,
    pub allocated: Vec<u64>,
    pub mismatches: Vec<(u64, Pattern)>,
}

impl ProgressSink for RecordingSink {
    fn report(&mut self, fraction_complete: f64, pattern: Pattern) {
        self.reports.push((fraction_complete, pattern));
    }

    fn device_opened(&mut self, device: &DeviceInfo) {
        self.devices.push(device.device_name.clone());
    }

    fn allocation_attempt(&mut self, size: u64) {
        self.attempts.push(size);
    }

    fn allocated(&mut self, size: u64) {
        self.allocated.push(size);
    }

    fn mismatch(&mut self, offset: u64, pattern: Pattern) {
        self.mismatches.push((offset, pattern));
    }
}
