//! Stoker core library: domain types, status records, file-backed bus store.
//!
//! Public API surface:
//! - [`types`]: desired-state metadata, sync profiles, git auth references
//! - [`status`]: the per-gateway status record written after every sync attempt
//! - [`store`]: load / save against a mounted bus directory
//! - [`error`]: [`StoreError`]

pub mod error;
pub mod status;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use status::{format_duration, GatewayStatus, SyncStatus};
pub use types::{GitAuthSpec, Mapping, MappingType, Metadata, Profile, SecretRef};
