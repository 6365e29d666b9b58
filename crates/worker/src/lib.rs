//! Operation execution engine.
//!
//! Wires the domain logic from `idp-core` to persisted records: the
//! [`executor`] runs one execution, the [`orchestrator`] drives a submission
//! through its executions, the [`approval`] gate handles approve/cancel, and
//! the [`queue`], [`dispatcher`] and [`retention`] modules run it all in the
//! background.

pub mod approval;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod logger;
pub mod orchestrator;
pub mod queue;
pub mod retention;
pub mod service;
pub mod store;
