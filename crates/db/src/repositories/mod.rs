//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod operation_execution_repo;
pub mod operation_log_repo;
pub mod operation_template_repo;
pub mod submission_repo;

pub use operation_execution_repo::OperationExecutionRepo;
pub use operation_log_repo::OperationLogRepo;
pub use operation_template_repo::OperationTemplateRepo;
pub use submission_repo::SubmissionRepo;
