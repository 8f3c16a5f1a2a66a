//! Platform and device discovery.
//!
//! An [`Enumerator`] owns the registered drivers and the platforms and
//! devices they expose. Enumeration happens once per driver registration,
//! so repeated queries return the same device handles.

pub mod device;
pub mod driver;
pub mod host;

pub use device::{Device, DeviceCapabilities, DeviceId, DeviceType, DeviceTypeFilter};
pub use driver::{CompiledEntry, CompiledModule, DeviceDescriptor, Driver, PlatformInfo};
pub use host::{HostDriver, KernelLibrary};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::util::id::object_id;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

object_id!(
    /// Identifies one registered platform.
    PlatformId,
    "platform"
);

/// A driver's runtime instance and the devices it exposes.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

struct PlatformInner {
    id: PlatformId,
    info: PlatformInfo,
    devices: Vec<Device>,
}

impl Platform {
    fn from_driver(driver: Arc<dyn Driver>) -> Self {
        let id = PlatformId::next();
        let info = driver.platform_info();
        let devices = driver
            .devices()
            .into_iter()
            .map(|descriptor| {
                debug!(
                    "platform '{}': found {:?} device '{}'",
                    info.name, descriptor.device_type, descriptor.name
                );
                Device::new(id, descriptor, Arc::clone(&driver))
            })
            .collect();

        Self {
            inner: Arc::new(PlatformInner { id, info, devices }),
        }
    }

    pub fn id(&self) -> PlatformId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    pub fn vendor(&self) -> &str {
        &self.inner.info.vendor
    }

    pub fn version(&self) -> &str {
        &self.inner.info.version
    }

    pub fn profile(&self) -> &str {
        &self.inner.info.profile
    }

    pub fn extensions(&self) -> &[String] {
        &self.inner.info.extensions
    }

    pub fn info(&self) -> &PlatformInfo {
        &self.inner.info
    }

    /// Devices on this platform that pass `filter`.
    pub fn devices(&self, filter: DeviceTypeFilter) -> Result<Vec<Device>> {
        let devices: Vec<Device> = self
            .inner
            .devices
            .iter()
            .filter(|d| filter.matches(d.device_type(), d.is_default()))
            .cloned()
            .collect();

        if devices.is_empty() {
            return Err(Error::NoDeviceFound {
                platform: self.name().to_string(),
                filter: filter.to_string(),
            });
        }
        Ok(devices)
    }
}

impl PartialEq for Platform {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Platform {}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("id", &self.inner.id)
            .field("name", &self.inner.info.name)
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}

/// Discovers platforms and devices through registered drivers.
#[derive(Debug, Clone, Default)]
pub struct Enumerator {
    platforms: Vec<Platform>,
}

impl Enumerator {
    /// An enumerator exposing the host platform with an empty kernel library.
    pub fn new() -> Result<Self> {
        Self::with_library(KernelLibrary::new(), &Config::default())
    }

    /// An enumerator exposing a host platform with limits taken from `config`.
    pub fn with_config(config: &Config) -> Result<Self> {
        Self::with_library(KernelLibrary::new(), config)
    }

    /// An enumerator exposing the host platform, linking kernels from `library`.
    pub fn with_library(library: KernelLibrary, config: &Config) -> Result<Self> {
        config.validate()?;
        let mut enumerator = Self::empty();
        enumerator.register(Arc::new(HostDriver::new(library, config)));
        Ok(enumerator)
    }

    /// An enumerator with no drivers registered.
    pub fn empty() -> Self {
        Self {
            platforms: Vec::new(),
        }
    }

    /// Register a driver; its devices are enumerated immediately.
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> Platform {
        let platform = Platform::from_driver(driver);
        info!(
            "registered platform '{}' ({} device(s))",
            platform.name(),
            platform.inner.devices.len()
        );
        self.platforms.push(platform.clone());
        platform
    }

    pub fn list_platforms(&self) -> Result<Vec<Platform>> {
        if self.platforms.is_empty() {
            return Err(Error::NoPlatformFound);
        }
        Ok(self.platforms.clone())
    }

    pub fn list_devices(&self, platform: &Platform, filter: DeviceTypeFilter) -> Result<Vec<Device>> {
        platform.devices(filter)
    }

    /// First device across all platforms that passes `filter`.
    pub fn first_device(&self, filter: DeviceTypeFilter) -> Result<Device> {
        let platforms = self.list_platforms()?;
        let mut last_err = None;
        for platform in &platforms {
            match platform.devices(filter) {
                Ok(mut devices) => return Ok(devices.remove(0)),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(Error::NoPlatformFound))
    }

    /// The platform a device was enumerated from.
    pub fn platform_of(&self, device: &Device) -> Option<Platform> {
        self.platforms
            .iter()
            .find(|p| p.id() == device.platform_id())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_enumerator_has_no_platforms() {
        let enumerator = Enumerator::empty();
        assert!(matches!(
            enumerator.list_platforms(),
            Err(Error::NoPlatformFound)
        ));
        assert!(enumerator.first_device(DeviceTypeFilter::ALL).is_err());
    }

    #[test]
    fn host_platform_exposes_cpu_device() {
        let enumerator = Enumerator::new().unwrap();
        let platforms = enumerator.list_platforms().unwrap();
        assert_eq!(platforms.len(), 1);

        let devices = enumerator
            .list_devices(&platforms[0], DeviceTypeFilter::ALL)
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type(), DeviceType::Cpu);
        assert!(devices[0].max_work_group_size() > 0);
    }

    #[test]
    fn filter_without_match_fails() {
        let enumerator = Enumerator::new().unwrap();
        let platform = &enumerator.list_platforms().unwrap()[0];
        let err = enumerator
            .list_devices(platform, DeviceTypeFilter::GPU)
            .unwrap_err();
        assert!(matches!(err, Error::NoDeviceFound { .. }));
        assert_eq!(err.category(), crate::ErrorCategory::Enumeration);
    }

    #[test]
    fn repeated_queries_return_same_devices() {
        let enumerator = Enumerator::new().unwrap();
        let platform = &enumerator.list_platforms().unwrap()[0];
        let a = platform.devices(DeviceTypeFilter::ALL).unwrap();
        let b = platform.devices(DeviceTypeFilter::DEFAULT).unwrap();
        assert_eq!(a[0], b[0]);
        assert_eq!(enumerator.platform_of(&a[0]).unwrap(), *platform);
    }
}
