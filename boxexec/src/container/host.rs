//! Host-process-backed container table.

use super::{ContainerInstance, ContainerSupervisor};
use crate::types::ContainerID;
use crate::util::process::is_process_alive;
use boxexec_shared::errors::{BoxexecError, BoxexecResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct ContainerRecord {
    instance: ContainerInstance,
    running: bool,
}

/// Thread-safe table of containers backed by host processes.
///
/// A "container" here is a name bound to the PID of a process whose
/// namespaces exec sessions join. The daemon registers them from
/// `--container NAME=PID`; embedders and tests drive them directly.
///
/// Liveness is the registered state combined with a `kill(pid, 0)` check, so
/// an init process that died without being marked stopped is still reported
/// as not running.
#[derive(Clone, Debug, Default)]
pub struct HostContainers {
    inner: Arc<RwLock<HashMap<String, ContainerRecord>>>,
    generations: Arc<AtomicU64>,
}

impl HostContainers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container, or restart it if the name is already known.
    ///
    /// A restart keeps the container ID but gets a new generation, which
    /// invalidates sessions created against the previous incarnation.
    pub fn register(&self, name: impl Into<String>, pid: u32) -> ContainerInstance {
        let name = name.into();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner.write();

        let id = inner
            .get(&name)
            .map(|r| r.instance.id.clone())
            .unwrap_or_default();

        let instance = ContainerInstance {
            id,
            name: name.clone(),
            pid,
            generation,
        };

        tracing::debug!(
            container = %name,
            container_id = %instance.id.short(),
            pid,
            generation,
            "Registering container"
        );
        inner.insert(
            name,
            ContainerRecord {
                instance: instance.clone(),
                running: true,
            },
        );
        instance
    }

    /// Mark a container as stopped. Its sessions can no longer be started.
    pub fn mark_stopped(&self, reference: &str) -> BoxexecResult<()> {
        let mut inner = self.inner.write();
        let name = find_name(&inner, reference)
            .ok_or_else(|| BoxexecError::ContainerNotFound(reference.to_string()))?;

        if let Some(record) = inner.get_mut(&name) {
            tracing::debug!(container = %name, "Marking container stopped");
            record.running = false;
        }
        Ok(())
    }

    /// Forget a container entirely.
    pub fn remove(&self, reference: &str) -> bool {
        let mut inner = self.inner.write();
        match find_name(&inner, reference) {
            Some(name) => inner.remove(&name).is_some(),
            None => false,
        }
    }

    /// All known containers, running or not, sorted by name.
    pub fn list(&self) -> Vec<(ContainerInstance, bool)> {
        let inner = self.inner.read();
        let mut all: Vec<_> = inner
            .values()
            .map(|r| (r.instance.clone(), r.running && is_process_alive(r.instance.pid)))
            .collect();
        all.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        all
    }
}

/// Find the table key for a name, full ID or unique ID prefix.
fn find_name(table: &HashMap<String, ContainerRecord>, reference: &str) -> Option<String> {
    if reference.is_empty() {
        return None;
    }
    if table.contains_key(reference) {
        return Some(reference.to_string());
    }

    let mut matches = table
        .values()
        .filter(|r| r.instance.id.starts_with(reference));
    let first = matches.next()?;
    if matches.next().is_some() {
        // Ambiguous prefix
        return None;
    }
    Some(first.instance.name.clone())
}

impl ContainerSupervisor for HostContainers {
    fn resolve(&self, reference: &str) -> Option<ContainerInstance> {
        let inner = self.inner.read();
        let name = find_name(&inner, reference)?;
        inner.get(&name).map(|r| r.instance.clone())
    }

    fn is_running(&self, instance: &ContainerInstance) -> bool {
        let inner = self.inner.read();
        match inner.get(&instance.name) {
            Some(record) => {
                record.running
                    && record.instance.is_same_instance(instance)
                    && is_process_alive(instance.pid)
            }
            None => false,
        }
    }
}
