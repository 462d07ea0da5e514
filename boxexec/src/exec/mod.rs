//! Exec sessions.
//!
//! ## Architecture
//!
//! - **Validation** (validator.rs): request checks before anything is allocated
//! - **State** (state.rs, store.rs): session records and atomic transitions
//! - **Lifecycle** (controller.rs, reaper.rs): start, completion and cleanup
//! - **Launching** (launcher.rs, exec_handle.rs, output.rs): process spawning and output
//! - **Inspection** (inspect.rs): external view of a session

pub mod controller;
pub mod exec_handle;
pub mod inspect;
pub mod launcher;
pub mod output;
pub mod reaper;
pub mod state;
pub mod store;
pub mod validator;

pub use controller::{ExecController, StartedExec};
pub use exec_handle::{ExecHandle, ExitStatus, OutputStream};
pub use launcher::{HostLauncher, LaunchSpec, Launcher};
#[cfg(target_os = "linux")]
pub use launcher::NamespaceLauncher;
pub use reaper::start_reaper;
pub use state::{ExecConfig, ExecSession, ExecStatus, ExecUser};
pub use store::SessionStore;
