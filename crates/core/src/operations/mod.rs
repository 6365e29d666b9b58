//! Operation execution domain logic.
//!
//! Command rendering, safety validation, process running, the execution
//! state machine and the policies around it. Nothing here touches the
//! database; the worker crate wires these pieces to persisted records.

pub mod access;
pub mod builder;
pub mod kind;
pub mod retention;
pub mod retry;
pub mod runner;
pub mod status;
pub mod validator;

/// Default per-template process timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 300;
