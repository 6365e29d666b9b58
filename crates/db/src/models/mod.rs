//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - `Create*` DTOs for inserts

pub mod operation;
pub mod submission;
