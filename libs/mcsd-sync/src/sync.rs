//! The sync orchestrator.
//!
//! One [`UpdateClient::run_update`] call walks the directory registry in
//! insertion order, synchronizes each source into the query directory and
//! returns a per-directory report. Directories discovered while the run is
//! in progress are appended to the registry and picked up in the same pass.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use fhir_client::models::{Bundle, BundleEntry, BundleEntryRequest};
use fhir_client::{FhirClient, SearchSet, TokenProvider};
use serde_json::Value;
use url::Url;

use crate::cursor::{directory_key, CursorStore};
use crate::dedup::deduplicate_history_entries;
use crate::discovery;
use crate::error::{RegistryError, SyncError};
use crate::registry::{DirectoryRegistry, SourceDirectory, ROOT_DIRECTORY_RESOURCE_TYPES};
use crate::report::{DirectoryUpdateReport, UpdateReport};
use crate::transaction::build_transaction_entry;
use crate::tree::OrganizationTree;
use crate::validate::{validate_tree_roots, ValidationRules};

/// Subtracted from the local query start time when the server does not
/// provide `Bundle.meta.lastUpdated`, to absorb clock differences between
/// this client and the FHIR server.
const CLOCK_SKEW_BUFFER_SECS: i64 = 2;

/// Engine configuration; see the crate docs for the directory model.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// FHIR base URL of the query directory receiving the consolidated
    /// transaction bundles.
    pub query_directory_url: String,
    /// Base URLs of the configured root (discoverable) directories.
    pub root_directories: Vec<String>,
    /// Base URLs that must never be registered, not even via discovery.
    pub exclude_directories: Vec<String>,
    /// Resource-type whitelist for discovered provider directories.
    pub directory_resource_types: Vec<String>,
    /// Cursor persistence path; `None` disables persistence.
    pub state_file: Option<PathBuf>,
    /// Enables initial-snapshot sync and the 410 Gone fallback.
    pub snapshot_mode_support: bool,
}

pub struct UpdateClient {
    config: SyncConfig,
    http: reqwest::Client,
    token_provider: Option<Arc<dyn TokenProvider>>,
    registry: DirectoryRegistry,
    cursors: CursorStore,
    update_lock: tokio::sync::Mutex<()>,
}

impl UpdateClient {
    /// Create the engine and register the configured root directories.
    /// A malformed root URL is an engine-level error.
    pub fn new(
        config: SyncConfig,
        http: reqwest::Client,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<Self, RegistryError> {
        let registry = DirectoryRegistry::new(config.exclude_directories.clone());
        for root in &config.root_directories {
            registry.register(
                root,
                ROOT_DIRECTORY_RESOURCE_TYPES
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                true,
                "",
                "",
            )?;
        }
        let cursors = CursorStore::load(config.state_file.clone());
        Ok(Self {
            config,
            http,
            token_provider,
            registry,
            cursors,
            update_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &DirectoryRegistry {
        &self.registry
    }

    /// Synchronize every registered directory, in registration order.
    ///
    /// Holds a process-wide lock for the duration of the run; concurrent
    /// callers queue up. Per-source failures land in that source's report
    /// block and do not stop the run.
    pub async fn run_update(&self) -> UpdateReport {
        let _guard = self.update_lock.lock().await;

        let mut report = UpdateReport::new();
        let mut index = 0;
        while let Some(directory) = self.registry.get(index) {
            index += 1;
            let key = directory_key(&directory.base_url, &directory.authoritative_ura);
            let directory_report = match self.sync_directory(&directory).await {
                Ok(directory_report) => directory_report,
                Err(e) => {
                    tracing::error!(
                        directory = %directory.base_url,
                        error = %e,
                        "mCSD directory update failed"
                    );
                    DirectoryUpdateReport {
                        errors: vec![e.to_string()],
                        ..Default::default()
                    }
                }
            };
            report.insert(key, directory_report);
        }
        report
    }

    fn client_for(&self, base_url: &str) -> Result<FhirClient, SyncError> {
        let url = Url::parse(base_url).map_err(|e| SyncError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        FhirClient::new(url, self.http.clone(), self.token_provider.clone()).map_err(|e| {
            SyncError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn sync_directory(
        &self,
        directory: &SourceDirectory,
    ) -> Result<DirectoryUpdateReport, SyncError> {
        tracing::info!(
            directory = %directory.base_url,
            discover = directory.discover,
            resource_types = ?directory.resource_types,
            "updating from mCSD directory"
        );
        let source_client = self.client_for(&directory.base_url)?;
        let query_client = self.client_for(&self.config.query_directory_url)?;

        let key = directory_key(&directory.base_url, &directory.authoritative_ura);
        let cursor = self.cursors.get(&key);
        let query_start = Utc::now();

        // Delta mode when a cursor exists; otherwise snapshot mode when
        // supported, else the entire history without `_since`.
        let use_history_mode = cursor.is_some() || !self.config.snapshot_mode_support;
        let mut use_snapshot_mode = cursor.is_none() && self.config.snapshot_mode_support;

        let mut entries: Vec<BundleEntry> = Vec::new();
        let mut first_bundle: Option<Bundle> = None;

        if use_history_mode {
            let mut params: Vec<(&str, &str)> = Vec::new();
            if let Some(since) = cursor.as_deref() {
                tracing::debug!(directory = %directory.base_url, _since = since, "delta mode");
                params.push(("_since", since));
            }
            'history: for (i, resource_type) in directory.resource_types.iter().enumerate() {
                match source_client.search_history(resource_type, &params).await {
                    Ok(set) => {
                        if i == 0 {
                            first_bundle = Some(set.bundle);
                        }
                        entries.extend(set.entries);
                    }
                    Err(e) if e.is_gone() => {
                        if !self.config.snapshot_mode_support {
                            return Err(SyncError::HistoryGone {
                                resource_type: resource_type.clone(),
                            });
                        }
                        tracing::warn!(
                            directory = %directory.base_url,
                            resource_type = %resource_type,
                            "410 Gone: history too old, falling back to snapshot mode"
                        );
                        use_snapshot_mode = true;
                        entries.clear();
                        first_bundle = None;
                        break 'history;
                    }
                    Err(e) => {
                        return Err(SyncError::HistoryQuery {
                            resource_type: resource_type.clone(),
                            source: e,
                        });
                    }
                }
            }
        }

        if use_snapshot_mode {
            tracing::info!(directory = %directory.base_url, "snapshot mode: full sync using search");
            entries.clear();
            for (i, resource_type) in directory.resource_types.iter().enumerate() {
                let set = source_client
                    .search_current(resource_type, &[])
                    .await
                    .map_err(|e| SyncError::SnapshotQuery {
                        resource_type: resource_type.clone(),
                        source: e,
                    })?;
                if i == 0 {
                    first_bundle = Some(set.bundle.clone());
                }
                entries.extend(decorate_snapshot_entries(set, resource_type));
            }
            // Drop the cursor so an interrupted snapshot re-evaluates the
            // mode cleanly on the next run.
            self.cursors.delete(&key);
        }

        let deduplicated = deduplicate_history_entries(&entries);

        if directory.discover {
            discovery::process_endpoint_deletes(&self.registry, &deduplicated);
        }

        // The authoritative tree comes from a dedicated current-state
        // search, not from the (possibly partial) history window.
        let organization_set = source_client
            .search_current("Organization", &[])
            .await
            .map_err(SyncError::OrganizationQuery)?;
        let mut tree = OrganizationTree::build(&organization_set.entries);
        if !directory.authoritative_ura.is_empty() {
            tree = tree.filter_by_ura(&directory.authoritative_ura);
        }
        validate_tree_roots(&tree)?;

        // Rule 6 checks ownership against every HealthcareService seen in
        // the window, not just the deduplicated survivors.
        let healthcare_services: Vec<Value> = entries
            .iter()
            .filter_map(|entry| entry.resource.clone())
            .filter(|resource| {
                resource.get("resourceType").and_then(Value::as_str) == Some("HealthcareService")
            })
            .collect();

        let rules = ValidationRules {
            allowed_resource_types: directory.resource_types.clone(),
        };
        let mut tx = Bundle::transaction();
        let mut report = DirectoryUpdateReport::default();
        for (i, entry) in deduplicated.iter().enumerate() {
            if let Err(e) = build_transaction_entry(
                &mut tx,
                entry,
                &rules,
                &tree,
                &healthcare_services,
                directory.discover,
                &directory.base_url,
            ) {
                report.warnings.push(format!("entry #{i}: {e}"));
            }
        }

        if directory.discover {
            discovery::discover_and_register(
                &self.registry,
                &entries,
                &tree,
                &self.config.directory_resource_types,
                &mut report,
            );
        }

        tracing::debug!(
            directory = %directory.base_url,
            count = tx.entry.len(),
            "built update transaction"
        );
        if tx.entry.is_empty() {
            return Ok(report);
        }

        let result = query_client
            .submit_transaction(&tx)
            .await
            .map_err(SyncError::Apply)?;
        for (i, entry) in result.entry.iter().enumerate() {
            let Some(response) = &entry.response else {
                report
                    .warnings
                    .push(format!("skipping response entry without status: #{i}"));
                continue;
            };
            match response.status.as_str() {
                s if s.starts_with("201") => report.created += 1,
                s if s.starts_with("200") => report.updated += 1,
                s if s.starts_with("204") => report.deleted += 1,
                other => report
                    .warnings
                    .push(format!("unexpected HTTP response status {other} (entry #{i})")),
            }
        }

        // Advance the cursor only after the query directory accepted the
        // transaction. Prefer the server's own timestamp; fall back to the
        // buffered local query start time.
        let next_cursor = first_bundle
            .and_then(|bundle| bundle.meta.and_then(|meta| meta.last_updated))
            .unwrap_or_else(|| {
                tracing::warn!(
                    directory = %directory.base_url,
                    "bundle meta.lastUpdated not available, using local time with buffer"
                );
                (query_start - chrono::Duration::seconds(CLOCK_SKEW_BUFFER_SECS))
                    .to_rfc3339_opts(SecondsFormat::Nanos, true)
            });
        self.cursors.set(&key, next_cursor);
        self.cursors.save();

        Ok(report)
    }
}

/// Search results carry no `request`; give each entry a synthetic PUT so
/// the downstream pipeline is uniform with history mode.
fn decorate_snapshot_entries(set: SearchSet, resource_type: &str) -> Vec<BundleEntry> {
    set.entries
        .into_iter()
        .map(|mut entry| {
            if entry.request.is_none() {
                let id = entry
                    .resource
                    .as_ref()
                    .and_then(|resource| fhir_client::models::resource_info(resource).ok())
                    .and_then(|info| info.id)
                    .unwrap_or_default();
                entry.request = Some(BundleEntryRequest {
                    method: "PUT".into(),
                    url: format!("{resource_type}/{id}"),
                });
            }
            entry
        })
        .collect()
}
