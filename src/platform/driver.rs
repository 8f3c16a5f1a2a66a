//! The seam between the dispatch core and a native compute runtime.
//!
//! A [`Driver`] reports platform identity and devices, and compiles kernel
//! source for a single device. Everything above it (contexts, queues,
//! memory, dispatch) is handled by the core.

use super::device::{DeviceCapabilities, DeviceType};
use crate::dispatch::KernelFn;
use crate::program::{BuildOptions, KernelSignature};
use std::fmt;
use std::sync::Arc;

/// Identity strings for a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub profile: String,
    pub extensions: Vec<String>,
}

/// A device as described by its driver.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceType,
    pub capabilities: DeviceCapabilities,
    pub is_default: bool,
}

/// One linked kernel entry point.
#[derive(Clone)]
pub struct CompiledEntry {
    pub signature: KernelSignature,
    pub body: Arc<dyn KernelFn>,
}

impl fmt::Debug for CompiledEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledEntry")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Output of a successful per-device compile.
#[derive(Debug, Clone, Default)]
pub struct CompiledModule {
    pub entries: Vec<CompiledEntry>,
    /// Warnings and notes; empty when the build was clean.
    pub log: String,
}

pub trait Driver: Send + Sync + fmt::Debug {
    fn platform_info(&self) -> PlatformInfo;

    fn devices(&self) -> Vec<DeviceDescriptor>;

    /// Compile `source` for `device`. The error value is the build log.
    fn compile(
        &self,
        device: &DeviceDescriptor,
        source: &str,
        options: &BuildOptions,
    ) -> std::result::Result<CompiledModule, String>;
}
