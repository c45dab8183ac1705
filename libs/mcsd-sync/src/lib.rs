//! mCSD directory synchronization engine.
//!
//! Consolidates healthcare-provider directory records from a federation of
//! remote FHIR directories into a single local query directory. A configured
//! set of root (discoverable) directories lists provider organizations and
//! the Endpoints of their self-hosted administration directories; this engine
//! discovers those directories, pulls authoritative data incrementally
//! (`_history?_since=`, with a snapshot fallback), validates URA authority
//! and tree well-formedness, rewrites references into `?_source=` conditional
//! form and applies the result idempotently as FHIR transaction bundles.
//!
//! The engine is driven by a single operation, [`UpdateClient::run_update`],
//! which returns a per-directory [`DirectoryUpdateReport`].

pub mod coding;
pub mod cursor;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod report;
pub mod sync;
pub mod transaction;
pub mod tree;
pub mod validate;

pub use cursor::{directory_key, CursorStore};
pub use error::{RegistryError, SyncError, ValidationError};
pub use registry::{
    default_directory_resource_types, DirectoryRegistry, SourceDirectory,
    ROOT_DIRECTORY_RESOURCE_TYPES,
};
pub use report::{DirectoryUpdateReport, UpdateReport};
pub use sync::{SyncConfig, UpdateClient};
