//! # stoker-sync
//!
//! Plan compilation and staged, atomic application of a gateway profile.
//!
//! [`compile_plan`] turns a profile plus template context into a validated
//! [`SyncPlan`]; [`execute`] stages, templates, diffs and promotes it into
//! the live directory.

pub mod engine;
pub mod error;
pub mod plan;

pub use engine::{execute, SyncResult};
pub use error::{PlanError, SyncError};
pub use plan::{
    build_apply_template, compile_plan, validate_resolved_path, ApplyTemplate, ResolvedMapping,
    SyncPlan, STAGING_DIR_NAME,
};
