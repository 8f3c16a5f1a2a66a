//! What a kernel body sees while it runs: its position in the index space
//! and typed access to its bound arguments.

use super::args::{Scalar, ScalarValue};
use super::ndrange::Partition;
use crate::memory::{AccessMode, Buffer};
use bytemuck::Pod;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU8, Ordering};

/// Failure raised by a kernel body. Ends the command with an execution fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct KernelFault {
    message: String,
}

impl KernelFault {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type KernelResult = std::result::Result<(), KernelFault>;

/// A kernel entry point's executable body.
///
/// Called once per work-group. Work-items of a group run sequentially on the
/// calling thread, so a kernel that needs a group barrier expresses it as
/// separate passes over [`WorkGroup::for_each_item`].
pub trait KernelFn: Send + Sync {
    fn execute_group(&self, group: &WorkGroup, args: &KernelArgs<'_>) -> KernelResult;
}

/// Adapts a per-work-item closure into a [`KernelFn`].
pub struct PerItem<F>(pub F);

impl<F> KernelFn for PerItem<F>
where
    F: Fn(&WorkItem, &KernelArgs<'_>) -> KernelResult + Send + Sync,
{
    fn execute_group(&self, group: &WorkGroup, args: &KernelArgs<'_>) -> KernelResult {
        group.for_each_item(|item| (self.0)(item, args))
    }
}

/// Adapts a per-work-group closure into a [`KernelFn`].
pub struct PerGroup<F>(pub F);

impl<F> KernelFn for PerGroup<F>
where
    F: Fn(&WorkGroup, &KernelArgs<'_>) -> KernelResult + Send + Sync,
{
    fn execute_group(&self, group: &WorkGroup, args: &KernelArgs<'_>) -> KernelResult {
        (self.0)(group, args)
    }
}

/// One work-group of an ND-range launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroup {
    work_dim: usize,
    group_id: [usize; 3],
    local_size: [usize; 3],
    global_size: [usize; 3],
    global_offset: [usize; 3],
    num_groups: [usize; 3],
}

impl WorkGroup {
    pub(crate) fn new(partition: &Partition, group_id: [usize; 3]) -> Self {
        Self {
            work_dim: partition.work_dim,
            group_id,
            local_size: partition.local,
            global_size: partition.padded,
            global_offset: partition.offset,
            num_groups: partition.groups,
        }
    }

    pub fn work_dim(&self) -> usize {
        self.work_dim
    }

    pub fn group_id(&self, dim: usize) -> usize {
        dim_or(&self.group_id, dim, 0)
    }

    pub fn local_size(&self, dim: usize) -> usize {
        dim_or(&self.local_size, dim, 1)
    }

    pub fn global_size(&self, dim: usize) -> usize {
        dim_or(&self.global_size, dim, 1)
    }

    pub fn num_groups(&self, dim: usize) -> usize {
        dim_or(&self.num_groups, dim, 1)
    }

    /// Work-items in this group.
    pub fn size(&self) -> usize {
        self.local_size.iter().product()
    }

    pub fn item(&self, local_id: [usize; 3]) -> WorkItem {
        let mut global_id = [0; 3];
        for d in 0..3 {
            global_id[d] = self.group_id[d] * self.local_size[d] + local_id[d] + self.global_offset[d];
        }
        WorkItem {
            group: *self,
            local_id,
            global_id,
        }
    }

    /// Run `f` for every work-item, dimension 0 varying fastest. Stops at the
    /// first fault.
    pub fn for_each_item<F>(&self, mut f: F) -> KernelResult
    where
        F: FnMut(&WorkItem) -> KernelResult,
    {
        let [lx, ly, lz] = self.local_size;
        for z in 0..lz {
            for y in 0..ly {
                for x in 0..lx {
                    f(&self.item([x, y, z]))?;
                }
            }
        }
        Ok(())
    }
}

/// Position of one work-item. Queries beyond `work_dim` return 0 for ids
/// and 1 for sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    group: WorkGroup,
    local_id: [usize; 3],
    global_id: [usize; 3],
}

impl WorkItem {
    pub fn work_dim(&self) -> usize {
        self.group.work_dim
    }

    pub fn global_id(&self, dim: usize) -> usize {
        dim_or(&self.global_id, dim, 0)
    }

    pub fn local_id(&self, dim: usize) -> usize {
        dim_or(&self.local_id, dim, 0)
    }

    pub fn group_id(&self, dim: usize) -> usize {
        self.group.group_id(dim)
    }

    /// Padded global extent; may exceed the size the launch was requested with.
    pub fn global_size(&self, dim: usize) -> usize {
        self.group.global_size(dim)
    }

    pub fn local_size(&self, dim: usize) -> usize {
        self.group.local_size(dim)
    }

    pub fn num_groups(&self, dim: usize) -> usize {
        self.group.num_groups(dim)
    }

    pub fn global_offset(&self, dim: usize) -> usize {
        dim_or(&self.group.global_offset, dim, 0)
    }

    /// Row-major linear index over the global extent, offset excluded.
    pub fn global_linear_id(&self) -> usize {
        let g = &self.group.global_size;
        let id = |d: usize| self.global_id[d] - self.group.global_offset[d];
        (id(2) * g[1] + id(1)) * g[0] + id(0)
    }

    pub fn local_linear_id(&self) -> usize {
        let l = &self.group.local_size;
        (self.local_id[2] * l[1] + self.local_id[1]) * l[0] + self.local_id[0]
    }
}

fn dim_or(values: &[usize; 3], dim: usize, default: usize) -> usize {
    values.get(dim).copied().unwrap_or(default)
}

impl<F> fmt::Debug for PerItem<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PerItem(..)")
    }
}

impl<F> fmt::Debug for PerGroup<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PerGroup(..)")
    }
}

/// An argument as resolved at enqueue time.
#[derive(Debug, Clone)]
pub(crate) enum BoundArg {
    Memory(Buffer),
    Local(usize),
    Scalar(ScalarValue),
}

/// Typed view over a kernel's arguments for one work-group.
pub struct KernelArgs<'a> {
    kernel: &'a str,
    args: &'a [BoundArg],
    locals: Vec<Option<Box<[AtomicU8]>>>,
}

impl<'a> KernelArgs<'a> {
    /// Fresh zeroed local memory is allocated for every `__local` argument.
    pub(crate) fn new(kernel: &'a str, args: &'a [BoundArg]) -> Self {
        let locals = args
            .iter()
            .map(|arg| match arg {
                BoundArg::Local(bytes) => Some((0..*bytes).map(|_| AtomicU8::new(0)).collect()),
                _ => None,
            })
            .collect();
        Self { kernel, args, locals }
    }

    pub fn kernel_name(&self) -> &str {
        self.kernel
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn scalar<T: Scalar>(&self, index: usize) -> Result<T, KernelFault> {
        match self.args.get(index) {
            Some(BoundArg::Scalar(value)) => value.get::<T>().ok_or_else(|| {
                KernelFault::new(format!(
                    "argument {index} is {}, read as {}",
                    value.scalar_type(),
                    T::TYPE
                ))
            }),
            _ => Err(self.wrong_kind(index, "scalar")),
        }
    }

    /// Elements of a `__global` or `__constant` buffer argument.
    pub fn global<T: Pod>(&self, index: usize) -> Result<MemRef<'_, T>, KernelFault> {
        match self.args.get(index) {
            Some(BoundArg::Memory(buffer)) => Ok(MemRef::new(buffer.device_bytes(), buffer.access(), index)),
            _ => Err(self.wrong_kind(index, "buffer")),
        }
    }

    /// Elements of this work-group's `__local` allocation.
    pub fn local<T: Pod>(&self, index: usize) -> Result<MemRef<'_, T>, KernelFault> {
        match self.locals.get(index) {
            Some(Some(bytes)) => Ok(MemRef::new(bytes, AccessMode::ReadWrite, index)),
            _ => Err(self.wrong_kind(index, "local memory")),
        }
    }

    fn wrong_kind(&self, index: usize, wanted: &str) -> KernelFault {
        if index >= self.args.len() {
            KernelFault::new(format!(
                "argument {index} does not exist ({} declared)",
                self.args.len()
            ))
        } else {
            KernelFault::new(format!("argument {index} is not {wanted}"))
        }
    }
}

impl fmt::Debug for KernelArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelArgs")
            .field("kernel", &self.kernel)
            .field("args", &self.args)
            .finish()
    }
}

/// Bounds- and access-checked element view over device or local memory.
pub struct MemRef<'a, T> {
    bytes: &'a [AtomicU8],
    access: AccessMode,
    arg: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> MemRef<'a, T> {
    fn new(bytes: &'a [AtomicU8], access: AccessMode, arg: usize) -> Self {
        Self {
            bytes,
            access,
            arg,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        match mem::size_of::<T>() {
            0 => 0,
            size => self.bytes.len() / size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<T, KernelFault> {
        if self.access == AccessMode::WriteOnly {
            return Err(KernelFault::new(format!(
                "read from write-only buffer (argument {})",
                self.arg
            )));
        }
        let src = self.element(index)?;
        let mut value = T::zeroed();
        for (dst, byte) in bytemuck::bytes_of_mut(&mut value).iter_mut().zip(src) {
            *dst = byte.load(Ordering::Relaxed);
        }
        Ok(value)
    }

    pub fn set(&self, index: usize, value: T) -> KernelResult {
        if self.access == AccessMode::ReadOnly {
            return Err(KernelFault::new(format!(
                "write to read-only buffer (argument {})",
                self.arg
            )));
        }
        let dst = self.element(index)?;
        for (byte, src) in dst.iter().zip(bytemuck::bytes_of(&value)) {
            byte.store(*src, Ordering::Relaxed);
        }
        Ok(())
    }

    fn element(&self, index: usize) -> Result<&'a [AtomicU8], KernelFault> {
        let size = mem::size_of::<T>();
        let start = index.checked_mul(size);
        match start.and_then(|s| self.bytes.get(s..s + size)) {
            Some(slice) => Ok(slice),
            None => Err(KernelFault::new(format!(
                "index {index} out of bounds for argument {} ({} elements)",
                self.arg,
                self.len()
            ))),
        }
    }
}

impl<T: Pod> fmt::Debug for MemRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemRef")
            .field("arg", &self.arg)
            .field("access", &self.access)
            .field("len", &self.len())
            .finish()
    }
}
