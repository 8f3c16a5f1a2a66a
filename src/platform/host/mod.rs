//! The built-in host driver.
//!
//! Exposes the host CPU as a compute device. Kernel source is scanned for
//! entry point signatures and each entry point is linked against a Rust body
//! registered in a [`KernelLibrary`]. Execution is handled by the core's
//! compute pools, not by the driver.

mod frontend;
mod library;

pub use library::KernelLibrary;

use super::device::{DeviceCapabilities, DeviceType};
use super::driver::{CompiledEntry, CompiledModule, DeviceDescriptor, Driver, PlatformInfo};
use crate::config::Config;
use crate::program::{BuildOptions, LanguageVersion};
use frontend::{Diagnostic, Severity};
use tracing::debug;

/// Driver that runs kernels on host threads.
#[derive(Debug, Clone)]
pub struct HostDriver {
    library: KernelLibrary,
    devices: Vec<DeviceDescriptor>,
}

impl HostDriver {
    /// A driver exposing one default CPU device sized from `config`.
    pub fn new(library: KernelLibrary, config: &Config) -> Self {
        Self {
            library,
            devices: vec![Self::host_device(config)],
        }
    }

    /// Expose an additional device. All devices share the library; their
    /// capabilities decide what each one accepts.
    pub fn with_device(mut self, descriptor: DeviceDescriptor) -> Self {
        self.devices.push(descriptor);
        self
    }

    /// Descriptor of the default host CPU device.
    pub fn host_device(config: &Config) -> DeviceDescriptor {
        DeviceDescriptor {
            name: "Host Compute Device".to_string(),
            vendor: "cldispatch".to_string(),
            device_type: DeviceType::Cpu,
            capabilities: DeviceCapabilities {
                max_compute_units: config.worker_threads(),
                max_work_group_size: config.host_max_work_group_size,
                max_work_item_dimensions: 3,
                max_work_item_sizes: config.host_max_work_item_sizes,
                global_mem_size: config.host_global_mem_size,
                max_mem_alloc_size: config.host_max_alloc_size,
                local_mem_size: config.host_local_mem_size,
                fp64: true,
                preferred_work_group_multiple: 1,
            },
            is_default: true,
        }
    }

    pub fn library(&self) -> &KernelLibrary {
        &self.library
    }
}

impl Driver for HostDriver {
    fn platform_info(&self) -> PlatformInfo {
        PlatformInfo {
            name: "cldispatch host".to_string(),
            vendor: "cldispatch".to_string(),
            version: format!("OpenCL 1.2 cldispatch {}", env!("CARGO_PKG_VERSION")),
            profile: "FULL_PROFILE".to_string(),
            extensions: vec!["cl_khr_fp64".to_string(), "cl_khr_byte_addressable_store".to_string()],
        }
    }

    fn devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.clone()
    }

    fn compile(
        &self,
        device: &DeviceDescriptor,
        source: &str,
        options: &BuildOptions,
    ) -> std::result::Result<CompiledModule, String> {
        let scan = frontend::scan(source, options, device.capabilities.fp64);
        let mut diagnostics = scan.diagnostics;

        if let Some(pos) = scan.double_use {
            if !device.capabilities.fp64 {
                diagnostics.push(Diagnostic::error(
                    pos,
                    format!(
                        "type 'double' requires cl_khr_fp64, which device '{}' does not support",
                        device.name
                    ),
                ));
            } else if !scan.fp64_pragma && options.language_version_or_default() == LanguageVersion::Cl1_1 {
                diagnostics.push(Diagnostic::error(
                    pos,
                    "use of type 'double' requires cl_khr_fp64 extension to be enabled",
                ));
            }
        }

        let mut entries = Vec::with_capacity(scan.kernels.len());
        for kernel in scan.kernels {
            match self.library.get(&kernel.signature.name) {
                Some(body) => entries.push(CompiledEntry {
                    signature: kernel.signature,
                    body,
                }),
                None => diagnostics.push(Diagnostic::error(
                    kernel.pos,
                    format!("undefined reference to kernel body '{}'", kernel.signature.name),
                )),
            }
        }

        if options.suppress_warnings {
            diagnostics.retain(Diagnostic::is_error);
        } else if options.warnings_as_errors {
            for d in diagnostics.iter_mut().filter(|d| d.severity == Severity::Warning) {
                d.severity = Severity::Error;
                d.message.push_str(" [-Werror]");
            }
        }

        let log = frontend::render_log(&diagnostics);
        if diagnostics.iter().any(Diagnostic::is_error) {
            debug!("build for '{}' failed:\n{}", device.name, log);
            return Err(log);
        }

        debug!("build for '{}' linked {} kernel(s)", device.name, entries.len());
        Ok(CompiledModule { entries, log })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "__kernel void scale(__global float* v, float s) {\n  v[get_global_id(0)] *= s;\n}\n";

    fn driver() -> HostDriver {
        let library = KernelLibrary::new();
        library.register_fn("scale", |_, _| Ok(()));
        HostDriver::new(library, &Config::default())
    }

    fn no_fp64() -> DeviceDescriptor {
        DeviceDescriptor {
            name: "Simulated GPU".to_string(),
            vendor: "test".to_string(),
            device_type: DeviceType::Gpu,
            capabilities: DeviceCapabilities::default(),
            is_default: false,
        }
    }

    #[test]
    fn links_registered_kernels() {
        let driver = driver();
        let device = &driver.devices()[0];
        let module = driver.compile(device, SOURCE, &BuildOptions::default()).unwrap();
        assert_eq!(module.entries.len(), 1);
        assert_eq!(module.entries[0].signature.name, "scale");
        assert!(module.log.is_empty());
    }

    #[test]
    fn missing_body_is_undefined_reference() {
        let driver = HostDriver::new(KernelLibrary::new(), &Config::default());
        let device = &driver.devices()[0];
        let log = driver.compile(device, SOURCE, &BuildOptions::default()).unwrap_err();
        assert!(log.contains("1:15: error: undefined reference to kernel body 'scale'"), "{log}");
        assert!(log.ends_with("1 error(s) generated."));
    }

    #[test]
    fn double_fails_without_fp64() {
        let driver = driver().with_device(no_fp64());
        let devices = driver.devices();
        let source = "__kernel void scale(__global double* v, double s) {}";

        let log = driver.compile(&devices[1], source, &BuildOptions::default()).unwrap_err();
        assert!(log.contains("cl_khr_fp64"));
        assert!(driver.compile(&devices[0], source, &BuildOptions::default()).is_ok());

        let cl11 = BuildOptions::parse("-cl-std=CL1.1").unwrap();
        assert!(driver.compile(&devices[0], source, &cl11).is_err());
    }

    #[test]
    fn werror_promotes_warnings() {
        let driver = driver();
        let device = &driver.devices()[0];
        let source = format!("#pragma something_odd\n{SOURCE}");

        let ok = driver.compile(device, &source, &BuildOptions::default()).unwrap();
        assert!(ok.log.contains("warning"));

        let quiet = driver.compile(device, &source, &BuildOptions::parse("-w").unwrap()).unwrap();
        assert!(quiet.log.is_empty());

        let log = driver
            .compile(device, &source, &BuildOptions::parse("-Werror").unwrap())
            .unwrap_err();
        assert!(log.contains("[-Werror]"));
    }
}
