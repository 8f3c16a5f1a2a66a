use super::signature::{ArgKind, KernelSignature};
use super::Program;
use crate::dispatch::work_item::BoundArg;
use crate::dispatch::{ArgValue, KernelFn};
use crate::error::{Error, Result};
use crate::platform::{Device, DeviceId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Work-group limits of a kernel on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroupInfo {
    pub work_group_size: usize,
    /// Bytes of `__local` memory requested by the bound arguments.
    pub local_mem_size: usize,
    pub preferred_work_group_size_multiple: usize,
}

/// An entry point of a built program with its argument slots.
///
/// Clones share argument slots. Enqueueing takes a snapshot, so later
/// `set_arg` calls never affect commands already enqueued.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

struct KernelInner {
    program: Program,
    signature: KernelSignature,
    bodies: HashMap<DeviceId, Arc<dyn KernelFn>>,
    args: Mutex<Vec<Option<ArgValue>>>,
}

/// Everything a launch needs, captured at enqueue time.
pub(crate) struct LaunchSnapshot {
    pub body: Arc<dyn KernelFn>,
    pub args: Vec<BoundArg>,
    pub local_mem: usize,
}

impl Kernel {
    pub(crate) fn new(
        program: Program,
        signature: KernelSignature,
        bodies: HashMap<DeviceId, Arc<dyn KernelFn>>,
    ) -> Self {
        let slots = vec![None; signature.arg_count()];
        Self {
            inner: Arc::new(KernelInner {
                program,
                signature,
                bodies,
                args: Mutex::new(slots),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.signature.name
    }

    pub fn signature(&self) -> &KernelSignature {
        &self.inner.signature
    }

    pub fn arg_count(&self) -> usize {
        self.inner.signature.arg_count()
    }

    pub fn program(&self) -> &Program {
        &self.inner.program
    }

    pub fn is_arg_set(&self, index: usize) -> bool {
        matches!(self.inner.args.lock().get(index), Some(Some(_)))
    }

    /// Bind `value` to argument `index`.
    ///
    /// On error the previous binding of every slot is kept.
    pub fn set_arg<V: Into<ArgValue>>(&self, index: usize, value: V) -> Result<()> {
        let value = value.into();
        let param = self
            .inner
            .signature
            .params
            .get(index)
            .ok_or_else(|| Error::InvalidArgIndex {
                kernel: self.name().to_string(),
                index,
                count: self.arg_count(),
            })?;

        let accepted = match (&param.kind, &value) {
            (ArgKind::Memory { .. }, ArgValue::Buffer(buffer)) => {
                if buffer.context_id() != self.inner.program.context().id() {
                    return Err(Error::ContextMismatch);
                }
                true
            }
            (ArgKind::Local { .. }, ArgValue::Local(bytes)) => {
                if *bytes == 0 {
                    return Err(Error::invalid_arg(format!(
                        "argument {index} of '{}': local memory size must be non-zero",
                        self.name()
                    )));
                }
                true
            }
            (ArgKind::Scalar(declared), ArgValue::Scalar(scalar)) => scalar.scalar_type().binds_to(*declared),
            _ => false,
        };
        if !accepted {
            return Err(Error::ArgTypeMismatch {
                kernel: self.name().to_string(),
                index,
                expected: param.kind.to_string(),
                actual: value.describe(),
            });
        }

        self.inner.args.lock()[index] = Some(value);
        Ok(())
    }

    pub fn work_group_info(&self, device: &Device) -> Result<WorkGroupInfo> {
        if !self.inner.bodies.contains_key(&device.id()) {
            return Err(Error::ProgramNotBuilt(device.name().to_string()));
        }
        let caps = device.capabilities();
        Ok(WorkGroupInfo {
            work_group_size: caps.max_work_group_size,
            local_mem_size: self.local_mem_size(),
            preferred_work_group_size_multiple: caps.preferred_work_group_multiple,
        })
    }

    fn local_mem_size(&self) -> usize {
        self.inner
            .args
            .lock()
            .iter()
            .map(|arg| match arg {
                Some(ArgValue::Local(bytes)) => *bytes,
                _ => 0,
            })
            .sum()
    }

    /// Resolve the body for `device` and copy out the current bindings.
    pub(crate) fn launch_snapshot(&self, device: &Device) -> Result<LaunchSnapshot> {
        let body = self
            .inner
            .bodies
            .get(&device.id())
            .cloned()
            .ok_or_else(|| Error::ProgramNotBuilt(device.name().to_string()))?;

        let slots = self.inner.args.lock();
        let mut args = Vec::with_capacity(slots.len());
        let mut local_mem = 0;
        for (index, slot) in slots.iter().enumerate() {
            let bound = match slot {
                Some(ArgValue::Buffer(buffer)) => BoundArg::Memory(buffer.clone()),
                Some(ArgValue::Local(bytes)) => {
                    local_mem += bytes;
                    BoundArg::Local(*bytes)
                }
                Some(ArgValue::Scalar(value)) => BoundArg::Scalar(*value),
                None => {
                    return Err(Error::ArgNotSet {
                        kernel: self.name().to_string(),
                        index,
                    })
                }
            };
            args.push(bound);
        }
        Ok(LaunchSnapshot { body, args, local_mem })
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.inner.signature.name)
            .field("args", &self.arg_count())
            .field("program", &self.inner.program.id())
            .finish()
    }
}
