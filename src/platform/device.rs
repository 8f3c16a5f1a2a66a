//! Device handles and capability descriptions.

use super::driver::{DeviceDescriptor, Driver};
use super::PlatformId;
use crate::util::id::object_id;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

object_id!(
    /// Identifies one enumerated device.
    DeviceId,
    "device"
);

/// Class of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Cpu,
    Gpu,
    Accelerator,
    Custom,
}

impl DeviceType {
    fn filter_bit(self) -> u32 {
        match self {
            DeviceType::Cpu => DeviceTypeFilter::CPU.0,
            DeviceType::Gpu => DeviceTypeFilter::GPU.0,
            DeviceType::Accelerator => DeviceTypeFilter::ACCELERATOR.0,
            DeviceType::Custom => DeviceTypeFilter::CUSTOM.0,
        }
    }
}

/// Set of device types used to filter enumeration results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceTypeFilter(u32);

impl DeviceTypeFilter {
    /// The driver's default device only.
    pub const DEFAULT: Self = Self(1);
    pub const CPU: Self = Self(1 << 1);
    pub const GPU: Self = Self(1 << 2);
    pub const ACCELERATOR: Self = Self(1 << 3);
    pub const CUSTOM: Self = Self(1 << 4);
    pub const ALL: Self = Self(u32::MAX);

    /// Whether a device of `device_type` passes this filter.
    pub fn matches(&self, device_type: DeviceType, is_default: bool) -> bool {
        if self.0 & device_type.filter_bit() != 0 {
            return true;
        }
        is_default && self.0 & Self::DEFAULT.0 != 0
    }
}

impl BitOr for DeviceTypeFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<DeviceType> for DeviceTypeFilter {
    fn from(device_type: DeviceType) -> Self {
        Self(device_type.filter_bit())
    }
}

impl fmt::Display for DeviceTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ALL {
            return f.write_str("ALL");
        }
        let names: Vec<&str> = [
            (Self::DEFAULT, "DEFAULT"),
            (Self::CPU, "CPU"),
            (Self::GPU, "GPU"),
            (Self::ACCELERATOR, "ACCELERATOR"),
            (Self::CUSTOM, "CUSTOM"),
        ]
        .iter()
        .filter(|(bit, _)| self.0 & bit.0 != 0)
        .map(|(_, name)| *name)
        .collect();
        if names.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Hardware limits reported by a driver for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub max_compute_units: usize,
    pub max_work_group_size: usize,
    pub max_work_item_dimensions: usize,
    pub max_work_item_sizes: [usize; 3],
    pub global_mem_size: u64,
    pub max_mem_alloc_size: u64,
    pub local_mem_size: usize,
    pub fp64: bool,
    /// Work-group sizes that are a multiple of this run most efficiently.
    pub preferred_work_group_multiple: usize,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_compute_units: 1,
            max_work_group_size: 256,
            max_work_item_dimensions: 3,
            max_work_item_sizes: [256, 256, 64],
            global_mem_size: 256 * 1024 * 1024,
            max_mem_alloc_size: 64 * 1024 * 1024,
            local_mem_size: 32 * 1024,
            fp64: false,
            preferred_work_group_multiple: 1,
        }
    }
}

/// A compute device. Immutable once enumerated; clones share identity.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    id: DeviceId,
    platform: PlatformId,
    descriptor: DeviceDescriptor,
    driver: Arc<dyn Driver>,
}

impl Device {
    pub(crate) fn new(platform: PlatformId, descriptor: DeviceDescriptor, driver: Arc<dyn Driver>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                id: DeviceId::next(),
                platform,
                descriptor,
                driver,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    pub fn platform_id(&self) -> PlatformId {
        self.inner.platform
    }

    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    pub fn vendor(&self) -> &str {
        &self.inner.descriptor.vendor
    }

    pub fn device_type(&self) -> DeviceType {
        self.inner.descriptor.device_type
    }

    pub fn is_default(&self) -> bool {
        self.inner.descriptor.is_default
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.inner.descriptor.capabilities
    }

    pub fn max_work_group_size(&self) -> usize {
        self.capabilities().max_work_group_size
    }

    pub(crate) fn descriptor(&self) -> &DeviceDescriptor {
        &self.inner.descriptor
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Device {}

impl std::hash::Hash for Device {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("name", &self.inner.descriptor.name)
            .field("type", &self.inner.descriptor.device_type)
            .finish()
    }
}
