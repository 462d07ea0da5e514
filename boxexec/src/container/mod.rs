//! Container supervisor interface.
//!
//! The exec subsystem does not own containers. It only needs to resolve a
//! reference to a running instance and to ask whether that instance is still
//! alive when a session is started.

mod host;

pub use host::HostContainers;

use crate::types::ContainerID;
use serde::{Deserialize, Serialize};

/// One incarnation of a container.
///
/// `generation` changes every time the container is (re)started, so a session
/// created against one incarnation can tell that it outlived it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInstance {
    pub id: ContainerID,
    pub name: String,
    /// PID of the container's init process; its namespaces are the exec target.
    pub pid: u32,
    pub generation: u64,
}

impl ContainerInstance {
    /// Same container, same incarnation.
    pub fn is_same_instance(&self, other: &ContainerInstance) -> bool {
        self.id == other.id && self.generation == other.generation
    }
}

/// Resolves container references and reports liveness.
pub trait ContainerSupervisor: Send + Sync {
    /// Resolve a name, full id or unique id prefix to the current incarnation.
    fn resolve(&self, reference: &str) -> Option<ContainerInstance>;

    /// Whether this exact incarnation is still running.
    fn is_running(&self, instance: &ContainerInstance) -> bool;
}
