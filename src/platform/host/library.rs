use crate::dispatch::{KernelArgs, KernelFn, KernelResult, PerGroup, PerItem, WorkGroup, WorkItem};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Kernel bodies the host driver links declared entry points against.
///
/// Cloning shares the underlying registry, so bodies registered after a
/// driver was created are visible to later builds.
#[derive(Clone, Default)]
pub struct KernelLibrary {
    bodies: Arc<RwLock<HashMap<String, Arc<dyn KernelFn>>>>,
}

impl KernelLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `body` under `name`, replacing any previous body.
    pub fn register<K>(&self, name: impl Into<String>, body: K) -> &Self
    where
        K: KernelFn + 'static,
    {
        self.bodies.write().insert(name.into(), Arc::new(body));
        self
    }

    /// Register a body that runs once per work-item.
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F) -> &Self
    where
        F: Fn(&WorkItem, &KernelArgs<'_>) -> KernelResult + Send + Sync + 'static,
    {
        self.register(name, PerItem(f))
    }

    /// Register a body that runs once per work-group.
    pub fn register_group_fn<F>(&self, name: impl Into<String>, f: F) -> &Self
    where
        F: Fn(&WorkGroup, &KernelArgs<'_>) -> KernelResult + Send + Sync + 'static,
    {
        self.register(name, PerGroup(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn KernelFn>> {
        self.bodies.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bodies.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bodies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.read().is_empty()
    }
}

impl fmt::Debug for KernelLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bodies = self.bodies.read();
        let mut names: Vec<&String> = bodies.keys().collect();
        names.sort();
        f.debug_struct("KernelLibrary").field("kernels", &names).finish()
    }
}
