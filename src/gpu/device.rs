//! Adapter discovery.
//!
//! Every iteration rediscovers the adapter so a device lost between runs is
//! picked up again, not reused.

use std::cmp::Reverse;

use crate::error::BackendError;
use log::warn;
use wgpu::{Adapter, Backend, Backends, DeviceType, Instance, InstanceDescriptor};

/// What an adapter says about itself.
#[derive(Debug, Clone)]
pub struct GpuInfo {
    /// Position in `enumerate_gpus` order; what `--gpu-index` selects.
    pub index: usize,
    pub name: String,
    pub vendor: String,
    pub backend: Backend,
    pub device_type: DeviceType,
    pub driver: String,
    /// Largest single buffer the adapter allows. Used as the device memory
    /// size that seeds the allocation search.
    pub max_buffer_size: u64,
}

impl GpuInfo {
    fn from_adapter(index: usize, adapter: &Adapter) -> Self {
        let info = adapter.get_info();
        Self {
            index,
            name: info.name,
            vendor: vendor_name(info.vendor),
            backend: info.backend,
            device_type: info.device_type,
            driver: info.driver,
            max_buffer_size: adapter.limits().max_buffer_size,
        }
    }

    /// Platform string shown to the user: API backend plus driver.
    pub fn platform_name(&self) -> String {
        if self.driver.is_empty() {
            format!("{:?} ({})", self.backend, self.vendor)
        } else {
            format!("{:?} ({}, driver {})", self.backend, self.vendor, self.driver)
        }
    }
}

impl std::fmt::Display for GpuInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({:?}, {:?}, max buffer {})",
            self.index,
            self.name,
            self.backend,
            self.device_type,
            bytesize::ByteSize::b(self.max_buffer_size)
        )
    }
}

/// Ceiling on the memory size taken from `max_buffer_size` (256 GiB).
/// Some drivers report a sentinel near 2^52 for that limit, which would
/// turn the allocation search into millions of attempts.
pub const MAX_MEMORY_SEED: u64 = 256 * 1024 * 1024 * 1024;

/// Memory size to start the allocation search from, given the adapter's
/// `max_buffer_size`.
pub fn memory_seed(max_buffer_size: u64) -> u64 {
    if max_buffer_size > MAX_MEMORY_SEED {
        warn!(
            "Adapter reports a {} byte buffer limit; starting the search at {} instead. \
             Pass --memory-mb with the real VRAM size to skip the failing attempts.",
            max_buffer_size, MAX_MEMORY_SEED
        );
        MAX_MEMORY_SEED
    } else {
        max_buffer_size
    }
}

fn adapters() -> Vec<Adapter> {
    let instance = Instance::new(&InstanceDescriptor::default());
    instance.enumerate_adapters(Backends::all())
}

/// Lists every adapter on every backend. Empty on a machine without one.
pub fn enumerate_gpus() -> Vec<GpuInfo> {
    adapters()
        .iter()
        .enumerate()
        .map(|(index, adapter)| GpuInfo::from_adapter(index, adapter))
        .collect()
}

/// Picks the adapter at `index`, or the highest ranked one when `index` is
/// `None`.
///
/// # Errors
///
/// `BackendError::NoAdapter` when nothing was enumerated and
/// `BackendError::AdapterNotFound` for an index past the end.
pub fn select_gpu(index: Option<usize>) -> Result<(Adapter, GpuInfo), BackendError> {
    let adapters = adapters();
    if adapters.is_empty() {
        return Err(BackendError::NoAdapter);
    }

    let idx = match index {
        Some(idx) => idx,
        None => auto_select_gpu(&adapters).unwrap_or(0),
    };

    if idx >= adapters.len() {
        let available: Vec<String> = adapters.iter().map(|a| a.get_info().name).collect();
        return Err(BackendError::AdapterNotFound {
            index: idx,
            available,
        });
    }

    let adapter = adapters
        .into_iter()
        .nth(idx)
        .ok_or(BackendError::NoAdapter)?;
    let info = GpuInfo::from_adapter(idx, &adapter);
    Ok((adapter, info))
}

/// Preference rank of a device type; higher is better.
fn device_rank(device_type: DeviceType) -> u8 {
    match device_type {
        DeviceType::DiscreteGpu => 3,
        DeviceType::IntegratedGpu => 2,
        DeviceType::VirtualGpu => 1,
        _ => 0,
    }
}

/// Index of the best adapter: discrete, then integrated, then virtual,
/// then anything; the first wins a tie.
fn auto_select_gpu(adapters: &[Adapter]) -> Option<usize> {
    adapters
        .iter()
        .enumerate()
        .max_by_key(|(index, adapter)| (device_rank(adapter.get_info().device_type), Reverse(*index)))
        .map(|(index, _)| index)
}

/// PCI vendor id to a display name.
fn vendor_name(vendor_id: u32) -> String {
    match vendor_id {
        0x1002 => "AMD".to_string(),
        0x1010 => "ImgTec".to_string(),
        0x10DE => "NVIDIA".to_string(),
        0x13B5 => "ARM".to_string(),
        0x5143 => "Qualcomm".to_string(),
        0x8086 => "Intel".to_string(),
        0x106B => "Apple".to_string(),
        _ => format!("Unknown (0x{:04X})", vendor_id),
    }
}
