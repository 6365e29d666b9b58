//! Domain logic for the operation execution engine.
//!
//! Everything in this crate is free of database access so it can be unit
//! tested in isolation. Persistence lives in `idp-db`; orchestration lives in
//! `idp-worker`.

pub mod error;
pub mod operations;
pub mod types;
