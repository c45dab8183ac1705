//! Transaction bundle construction.
//!
//! Turns validated source entries into conditional `?_source=` operations:
//! the query directory assigns its own resource ids, so every entry and
//! every internal reference is keyed by the deterministic source URL instead
//! of a server-assigned id.

use fhir_client::models::{Bundle, BundleEntry, BundleEntryRequest, Endpoint};
use fhir_client::source_url::{build_source_url, build_source_url_from_reference};
use serde_json::Value;

use crate::coding;
use crate::error::EntryError;
use crate::tree::OrganizationTree;
use crate::validate::{validate, ValidationRules};

/// Append the transaction entry for one deduplicated bundle entry.
///
/// Entries from a discoverable (root) directory are not forwarded to the
/// query directory, with one exception: Endpoints carrying the
/// mCSD-directory payload coding pass through, so the query directory keeps
/// serving directory addresses even when the root is down.
pub fn build_transaction_entry(
    tx: &mut Bundle,
    entry: &BundleEntry,
    rules: &ValidationRules,
    tree: &OrganizationTree,
    healthcare_services: &[Value],
    discoverable: bool,
    source_base_url: &str,
) -> Result<(), EntryError> {
    let full_url = entry.full_url.as_deref().ok_or(EntryError::MissingFullUrl)?;
    let request = entry.request.as_ref().ok_or(EntryError::MissingRequest)?;

    if request.method == "DELETE" {
        return build_delete_entry(tx, &request.url, rules, source_base_url);
    }

    let resource = entry.resource.as_ref().ok_or(EntryError::MissingResource)?;
    let resource_type = resource
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or(EntryError::MissingResourceType)?
        .to_string();

    validate(resource, rules, tree, healthcare_services)?;

    let mut resource = resource.clone();

    // The root registry is authoritative for the names of URA-bearing
    // organizations; a provider directory may not override them.
    if resource_type == "Organization" && !discoverable && has_ura_identifier(&resource) {
        if let Some(obj) = resource.as_object_mut() {
            obj.remove("name");
            tracing::debug!(full_url, "stripped name from URA-bearing Organization");
        }
    }

    if discoverable && !is_directory_endpoint(&resource_type, &resource)? {
        return Ok(());
    }

    let id = resource
        .get("id")
        .and_then(Value::as_str)
        .ok_or(EntryError::MissingResourceId)?
        .to_string();
    let source_url = build_source_url(source_base_url, &resource_type, &id)?;

    set_resource_source(&mut resource, &source_url);
    if let Some(obj) = resource.as_object_mut() {
        obj.remove("id");
    }
    convert_references(&mut resource, source_base_url)?;

    tracing::debug!(full_url, "updating resource");
    tx.entry.push(BundleEntry {
        full_url: None,
        resource: Some(resource),
        request: Some(BundleEntryRequest {
            method: "PUT".into(),
            url: conditional_url(&resource_type, &source_url),
        }),
        response: None,
    });
    Ok(())
}

fn build_delete_entry(
    tx: &mut Bundle,
    request_url: &str,
    rules: &ValidationRules,
    source_base_url: &str,
) -> Result<(), EntryError> {
    // "ResourceType/id" or "ResourceType/id/_history/version".
    let mut parts = request_url.split('/');
    let (resource_type, id) = match (parts.next(), parts.next()) {
        (Some(resource_type), Some(id)) if !resource_type.is_empty() && !id.is_empty() => {
            (resource_type, id)
        }
        _ => return Err(EntryError::InvalidDeleteUrl(request_url.to_string())),
    };

    if !rules
        .allowed_resource_types
        .iter()
        .any(|allowed| allowed == resource_type)
    {
        return Err(
            crate::error::ValidationError::ResourceTypeNotAllowed(resource_type.to_string())
                .into(),
        );
    }

    let source_url = build_source_url(source_base_url, resource_type, id)?;
    tx.entry.push(BundleEntry {
        full_url: None,
        resource: None,
        request: Some(BundleEntryRequest {
            method: "DELETE".into(),
            url: conditional_url(resource_type, &source_url),
        }),
        response: None,
    });
    Ok(())
}

/// `{Type}?_source={urlencoded source URL}`.
fn conditional_url(resource_type: &str, source_url: &str) -> String {
    format!("{resource_type}?_source={}", urlencode(source_url))
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Rewrite every relative `Type/id` reference to a conditional
/// `Type?_source=` reference. Other reference shapes are left alone.
fn convert_references(value: &mut Value, source_base_url: &str) -> Result<(), EntryError> {
    match value {
        Value::Object(map) => {
            let reference = map
                .get("reference")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(reference) = reference {
                let parts: Vec<&str> = reference.split('/').collect();
                if parts.len() == 2 {
                    let source_url =
                        build_source_url_from_reference(source_base_url, &reference)?;
                    let rewritten = conditional_url(parts[0], &source_url);
                    map.insert("reference".to_string(), Value::String(rewritten));
                }
            }
            for child in map.values_mut() {
                convert_references(child, source_base_url)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                convert_references(item, source_base_url)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Set `meta.source` and drop the server-assigned version markers.
fn set_resource_source(resource: &mut Value, source_url: &str) {
    let Some(obj) = resource.as_object_mut() else {
        return;
    };
    let meta = obj
        .entry("meta".to_string())
        .or_insert_with(|| Value::Object(Default::default()));
    if let Some(meta_obj) = meta.as_object_mut() {
        meta_obj.insert("source".to_string(), Value::String(source_url.to_string()));
        meta_obj.remove("versionId");
        meta_obj.remove("lastUpdated");
    }
}

fn has_ura_identifier(resource: &Value) -> bool {
    resource
        .get("identifier")
        .and_then(Value::as_array)
        .is_some_and(|identifiers| {
            identifiers.iter().any(|identifier| {
                identifier.get("system").and_then(Value::as_str)
                    == Some(coding::URA_NAMING_SYSTEM)
            })
        })
}

/// True when the resource is an Endpoint carrying the mCSD-directory
/// payload coding.
fn is_directory_endpoint(resource_type: &str, resource: &Value) -> Result<bool, EntryError> {
    if resource_type != "Endpoint" {
        return Ok(false);
    }
    let endpoint: Endpoint = serde_json::from_value(resource.clone()).map_err(|e| {
        EntryError::Validation(crate::error::ValidationError::InvalidResource(format!(
            "failed to interpret Endpoint resource: {e}"
        )))
    })?;
    Ok(coding::includes_directory_coding(&endpoint.payload_type))
}
