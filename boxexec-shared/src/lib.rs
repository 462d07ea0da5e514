//! BoxExec Shared - types shared by the exec core, daemon and API clients
//!
//! This crate contains the error taxonomy, wire constants and the JSON
//! bodies of the exec HTTP API.

pub mod constants;
pub mod errors;
pub mod wire;

pub use errors::{BoxexecError, BoxexecResult};
pub use wire::*;
