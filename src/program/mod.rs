//! Programs and kernels.
//!
//! A [`Program`] holds kernel source and one build record per device.
//! Builds are synchronous and independent per device: a failure on one
//! device leaves the others' successful builds usable.

pub mod kernel;
pub mod options;
pub mod signature;

pub use kernel::{Kernel, WorkGroupInfo};
pub use options::{BuildOptions, LanguageVersion};
pub use signature::{AddressSpace, ArgKind, KernelSignature, ParamDecl};

use crate::context::Context;
use crate::dispatch::KernelFn;
use crate::error::{Error, Result};
use crate::platform::{CompiledEntry, Device, DeviceId};
use crate::util::id::object_id;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

object_id!(
    /// Identifies one program.
    ProgramId,
    "program"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStatus {
    NotBuilt,
    Success,
    Failed,
}

/// Outcome of building for one device.
#[derive(Debug, Clone)]
pub struct DeviceBuild {
    pub device: Device,
    pub status: BuildStatus,
    pub log: String,
    pub options: String,
}

/// Per-device outcomes of one [`Program::build`] call.
#[derive(Debug, Clone)]
pub struct BuildReport {
    outcomes: Vec<DeviceBuild>,
}

impl BuildReport {
    pub fn outcomes(&self) -> &[DeviceBuild] {
        &self.outcomes
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeviceBuild> {
        self.outcomes.iter().filter(|o| o.status == BuildStatus::Failed)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &DeviceBuild> {
        self.outcomes.iter().filter(|o| o.status == BuildStatus::Success)
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn log_for(&self, device: &Device) -> Option<&str> {
        self.outcomes
            .iter()
            .find(|o| o.device == *device)
            .map(|o| o.log.as_str())
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "device '{}': {:?}", outcome.device.name(), outcome.status)?;
            if !outcome.log.is_empty() {
                writeln!(f, "{}", outcome.log)?;
            }
        }
        Ok(())
    }
}

struct BuildRecord {
    status: BuildStatus,
    log: String,
    options: String,
    entries: Vec<CompiledEntry>,
}

/// Kernel source plus its per-device builds.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

struct ProgramInner {
    id: ProgramId,
    context: Context,
    source: String,
    builds: RwLock<HashMap<DeviceId, BuildRecord>>,
}

impl Program {
    pub(crate) fn new(context: Context, source: &str) -> Self {
        Self {
            inner: Arc::new(ProgramInner {
                id: ProgramId::next(),
                context,
                source: source.to_string(),
                builds: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> ProgramId {
        self.inner.id
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Build for `devices`, or for every context device when empty.
    ///
    /// Devices that already hold a successful build keep it. If any device
    /// fails, the error carries the full report.
    pub fn build(&self, devices: &[Device], options: &str) -> Result<BuildReport> {
        let context = &self.inner.context;
        if context.is_released() {
            return Err(Error::ObjectReleased("context"));
        }
        let targets = if devices.is_empty() { context.devices() } else { devices };
        if let Some(outsider) = targets.iter().find(|d| !context.contains(d)) {
            return Err(Error::DeviceNotInContext(outsider.name().to_string()));
        }

        let parsed = BuildOptions::parse(options);
        let mut builds = self.inner.builds.write();
        let mut outcomes = Vec::with_capacity(targets.len());

        for device in targets {
            if let Some(record) = builds.get(&device.id()).filter(|r| r.status == BuildStatus::Success) {
                debug!("{} already built for '{}'", self.inner.id, device.name());
                outcomes.push(DeviceBuild {
                    device: device.clone(),
                    status: BuildStatus::Success,
                    log: record.log.clone(),
                    options: record.options.clone(),
                });
                continue;
            }

            let compiled = match &parsed {
                Ok(opts) => device.driver().compile(device.descriptor(), &self.inner.source, opts),
                Err(message) => Err(format!("error: {message}")),
            };
            let record = match compiled {
                Ok(module) => BuildRecord {
                    status: BuildStatus::Success,
                    log: module.log,
                    options: options.to_string(),
                    entries: module.entries,
                },
                Err(log) => {
                    warn!("{} failed to build for '{}'", self.inner.id, device.name());
                    BuildRecord {
                        status: BuildStatus::Failed,
                        log,
                        options: options.to_string(),
                        entries: Vec::new(),
                    }
                }
            };
            outcomes.push(DeviceBuild {
                device: device.clone(),
                status: record.status,
                log: record.log.clone(),
                options: record.options.clone(),
            });
            builds.insert(device.id(), record);
        }
        drop(builds);

        let report = BuildReport { outcomes };
        info!(
            "{} built: {} of {} device(s) succeeded",
            self.inner.id,
            report.succeeded().count(),
            report.outcomes().len()
        );
        if report.all_succeeded() {
            Ok(report)
        } else {
            Err(Error::BuildFailure(report))
        }
    }

    pub fn build_status(&self, device: &Device) -> BuildStatus {
        self.inner
            .builds
            .read()
            .get(&device.id())
            .map_or(BuildStatus::NotBuilt, |r| r.status)
    }

    /// Log of the last build for `device`; empty if never built.
    pub fn build_log(&self, device: &Device) -> String {
        self.inner
            .builds
            .read()
            .get(&device.id())
            .map(|r| r.log.clone())
            .unwrap_or_default()
    }

    pub fn build_options(&self, device: &Device) -> Option<String> {
        self.inner.builds.read().get(&device.id()).map(|r| r.options.clone())
    }

    /// Entry points across all successful builds, sorted.
    pub fn kernel_names(&self) -> Vec<String> {
        let builds = self.inner.builds.read();
        let names: BTreeSet<&str> = builds
            .values()
            .filter(|r| r.status == BuildStatus::Success)
            .flat_map(|r| r.entries.iter().map(|e| e.signature.name.as_str()))
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        let builds = self.inner.builds.read();
        let mut successful = builds
            .iter()
            .filter(|(_, r)| r.status == BuildStatus::Success)
            .peekable();
        if successful.peek().is_none() {
            let device = self.inner.context.devices()[0].name().to_string();
            return Err(Error::ProgramNotBuilt(device));
        }

        let mut signature = None;
        let mut bodies: HashMap<DeviceId, Arc<dyn KernelFn>> = HashMap::new();
        for (device, record) in successful {
            if let Some(entry) = record.entries.iter().find(|e| e.signature.name == name) {
                signature.get_or_insert_with(|| entry.signature.clone());
                bodies.insert(*device, Arc::clone(&entry.body));
            }
        }
        match signature {
            Some(signature) => Ok(Kernel::new(self.clone(), signature, bodies)),
            None => Err(Error::EntryPointNotFound(name.to_string())),
        }
    }

    /// One kernel per entry point.
    pub fn create_kernels(&self) -> Result<Vec<Kernel>> {
        let names = self.kernel_names();
        if names.is_empty() && self.inner.builds.read().values().all(|r| r.status != BuildStatus::Success) {
            let device = self.inner.context.devices()[0].name().to_string();
            return Err(Error::ProgramNotBuilt(device));
        }
        names.iter().map(|name| self.create_kernel(name)).collect()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("id", &self.inner.id)
            .field("context", &self.inner.context.id())
            .field("kernels", &self.kernel_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::platform::{DeviceCapabilities, DeviceType, DeviceTypeFilter, Enumerator, HostDriver, KernelLibrary};
    use crate::ErrorCategory;

    const SOURCE: &str = r#"
        __kernel void vadd(__global const float* a, __global const float* b, __global float* c) {
            int i = get_global_id(0);
            c[i] = a[i] + b[i];
        }

        __kernel void scale(__global double* v, double s) {
            v[get_global_id(0)] *= s;
        }
    "#;

    fn library() -> KernelLibrary {
        let library = KernelLibrary::new();
        library.register_fn("vadd", |_, _| Ok(()));
        library.register_fn("scale", |_, _| Ok(()));
        library
    }

    /// A context with the fp64 host device and a device without fp64.
    fn two_device_context() -> Context {
        let config = Config::default();
        let gpu = crate::platform::DeviceDescriptor {
            name: "Simulated GPU".into(),
            vendor: "test".into(),
            device_type: DeviceType::Gpu,
            capabilities: DeviceCapabilities::default(),
            is_default: false,
        };
        let mut enumerator = Enumerator::empty();
        let platform = enumerator.register(Arc::new(HostDriver::new(library(), &config).with_device(gpu)));
        Context::from_type(&platform, DeviceTypeFilter::ALL, &config).unwrap()
    }

    #[test]
    fn build_and_create_kernels() {
        let enumerator = Enumerator::with_library(library(), &Config::default()).unwrap();
        let device = enumerator.first_device(DeviceTypeFilter::ALL).unwrap();
        let ctx = Context::new(&[device.clone()], &Config::default()).unwrap();
        let program = ctx.create_program(SOURCE).unwrap();

        assert_eq!(program.build_status(&device), BuildStatus::NotBuilt);
        assert!(matches!(program.create_kernel("vadd"), Err(Error::ProgramNotBuilt(_))));

        let report = program.build(&[], "-DN=4").unwrap();
        assert!(report.all_succeeded());
        assert_eq!(program.build_status(&device), BuildStatus::Success);
        assert_eq!(program.build_options(&device).as_deref(), Some("-DN=4"));
        assert_eq!(program.kernel_names(), vec!["scale", "vadd"]);

        let kernel = program.create_kernel("vadd").unwrap();
        assert_eq!(kernel.arg_count(), 3);
        assert_eq!(program.create_kernels().unwrap().len(), 2);

        let err = program.create_kernel("missing").unwrap_err();
        assert!(matches!(err, Error::EntryPointNotFound(_)));
        assert_eq!(err.category(), ErrorCategory::Compilation);
    }

    #[test]
    fn per_device_failure_keeps_successes() {
        let ctx = two_device_context();
        let (host, gpu) = (ctx.devices()[0].clone(), ctx.devices()[1].clone());
        let program = ctx.create_program(SOURCE).unwrap();

        let err = program.build(&[], "").unwrap_err();
        let report = err.build_report().unwrap();
        assert_eq!(report.failed().count(), 1);
        assert!(report.log_for(&gpu).unwrap().contains("cl_khr_fp64"));
        assert_eq!(program.build_status(&host), BuildStatus::Success);
        assert_eq!(program.build_status(&gpu), BuildStatus::Failed);
        assert!(program.build_log(&gpu).contains("error"));

        let kernel = program.create_kernel("scale").unwrap();
        assert!(kernel.work_group_info(&host).is_ok());
        assert!(matches!(kernel.work_group_info(&gpu), Err(Error::ProgramNotBuilt(_))));
    }

    #[test]
    fn bad_options_fail_every_device() {
        let ctx = two_device_context();
        let program = ctx.create_program(SOURCE).unwrap();
        let err = program.build(&[], "-cl-unknown-flag").unwrap_err();
        let report = err.build_report().unwrap();
        assert_eq!(report.failed().count(), 2);
        assert!(report.to_string().contains("unrecognized build option"));
    }

    #[test]
    fn syntax_errors_are_logged() {
        let enumerator = Enumerator::with_library(library(), &Config::default()).unwrap();
        let device = enumerator.first_device(DeviceTypeFilter::ALL).unwrap();
        let ctx = Context::new(&[device.clone()], &Config::default()).unwrap();
        let program = ctx.create_program("__kernel void vadd(__global float* a {").unwrap();
        assert!(program.build(&[device.clone()], "").is_err());
        assert!(!program.build_log(&device).is_empty());
        assert_eq!(program.kernel_names(), Vec::<String>::new());
    }
}
