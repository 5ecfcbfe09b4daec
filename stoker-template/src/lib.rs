//! # stoker-template
//!
//! Strict template resolution for sync profiles and staged files.
//!
//! Mapping paths and `template: true` file contents are resolved against a
//! per-cycle [`TemplateContext`]. A reference to a key the context does not
//! carry is an error, never an empty substitution. Input without template
//! markers is passed through untouched.
//!
//! ## Usage
//!
//! ```rust
//! use stoker_template::{TemplateContext, TemplateResolver, TeraResolver};
//!
//! let ctx = TemplateContext::new("gw-blue").with_var("region", "us-east");
//! let resolved = TeraResolver.resolve("config/{{region}}/overlay", &ctx).unwrap();
//! assert_eq!(resolved, "config/us-east/overlay");
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::TemplateContext;
pub use engine::{has_template_markers, resolve_file_in_place, TemplateResolver, TeraResolver};
pub use error::TemplateError;
