//! Exec sessions for running containers.
//!
//! Creates, starts and inspects auxiliary processes inside already-running
//! containers. Each session moves through `Created → Starting → Running →
//! Exited` exactly once; concurrent start requests are resolved so that only
//! one of them ever launches the process.
//!
//! The [`api`] module exposes the sessions through the Docker Engine exec
//! endpoints.

pub mod api;
pub mod container;
pub mod exec;
pub mod options;
pub mod types;
pub mod util;

pub use boxexec_shared::errors::{BoxexecError, BoxexecResult};
pub use container::{ContainerInstance, ContainerSupervisor, HostContainers};
pub use exec::{ExecConfig, ExecController, ExecStatus, HostLauncher, Launcher};
#[cfg(target_os = "linux")]
pub use exec::NamespaceLauncher;
pub use options::{ExecOptions, LauncherKind};
pub use types::{ContainerID, ExecId};
