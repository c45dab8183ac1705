//! Per-directory update reports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Report of one `run_update()` call, keyed by directory key
/// (`baseURL` or `baseURL|URA`).
pub type UpdateReport = BTreeMap<String, DirectoryUpdateReport>;

/// Outcome of synchronizing a single source directory.
///
/// Warnings are per-entry issues (the entry was skipped); errors are fatal
/// for the whole source (its cursor was not advanced). Vectors serialize as
/// `[]` rather than `null` for a friendlier REST API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryUpdateReport {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}
