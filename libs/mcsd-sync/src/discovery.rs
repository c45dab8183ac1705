//! Endpoint discovery and lifecycle.
//!
//! Root directories publish the Endpoints of provider-hosted administration
//! directories. Pulled Endpoints carrying the mCSD-directory payload coding
//! register new source directories; Endpoint deletions unregister them.

use fhir_client::models::{reference_id, BundleEntry, Endpoint};

use crate::coding;
use crate::registry::DirectoryRegistry;
use crate::report::DirectoryUpdateReport;
use crate::tree::OrganizationTree;

/// Unregister source directories whose originating Endpoint was deleted.
///
/// Identity is the bundle `fullUrl` the Endpoint was registered under: a
/// later Endpoint at the same address but a different `fullUrl` is a
/// different registry entry.
pub fn process_endpoint_deletes(registry: &DirectoryRegistry, entries: &[BundleEntry]) {
    for entry in entries {
        let Some(request) = &entry.request else {
            continue;
        };
        if request.method != "DELETE" {
            continue;
        }
        let Some(full_url) = &entry.full_url else {
            continue;
        };
        let mut parts = request.url.split('/');
        if parts.next() == Some("Endpoint") && parts.next().is_some_and(|id| !id.is_empty()) {
            registry.unregister_by_source_entry_url(full_url);
        }
    }
}

/// Register provider directories for every discovered mCSD-directory
/// Endpoint referenced by a tree root.
///
/// Registration failures are per-entry warnings; the sync continues.
pub fn discover_and_register(
    registry: &DirectoryRegistry,
    entries: &[BundleEntry],
    tree: &OrganizationTree,
    directory_resource_types: &[String],
    report: &mut DirectoryUpdateReport,
) {
    for (root, _) in tree.roots() {
        let Some(authoritative_ura) = coding::ura_value(&root.identifier) else {
            continue;
        };
        if root.endpoint.is_empty() {
            continue;
        }

        for entry in entries {
            let Some(resource) = &entry.resource else {
                continue;
            };
            if resource.get("resourceType").and_then(|v| v.as_str()) != Some("Endpoint") {
                continue;
            }
            let Ok(endpoint) = serde_json::from_value::<Endpoint>(resource.clone()) else {
                continue;
            };
            let Some(endpoint_id) = endpoint.id.as_deref() else {
                continue;
            };
            let referenced = root.endpoint.iter().any(|r| {
                r.reference.as_deref().map(reference_id) == Some(endpoint_id)
            });
            if !referenced {
                continue;
            }
            let Some(full_url) = &entry.full_url else {
                continue;
            };
            if !coding::includes_directory_coding(&endpoint.payload_type) {
                continue;
            }
            let Some(address) = endpoint.address.as_deref() else {
                continue;
            };

            tracing::debug!(address, "discovered mCSD directory");
            if let Err(e) = registry.register(
                address,
                directory_resource_types.to_vec(),
                false,
                full_url,
                authoritative_ura,
            ) {
                report.warnings.push(format!(
                    "failed to register discovered mCSD directory at {address}: {e}"
                ));
            }
        }
    }
}
