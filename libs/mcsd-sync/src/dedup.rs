//! History deduplication.
//!
//! A `_history` feed returns arbitrary interleavings of resource versions;
//! collapsing to the most recent operation per resource ID avoids sending
//! contradictory operations in one transaction.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use fhir_client::models::{resource_info, BundleEntry};

/// Collapse a history feed to one entry per distinct resource ID.
///
/// The winner is the entry with the greatest `meta.lastUpdated`. DELETE
/// entries carry no body and thus no timestamp, so a DELETE only wins when it
/// is the only entry for its ID or no entry for that ID carries a timestamp;
/// this preserves the user-visible semantic that a later create after a
/// delete takes effect. Entries yielding no resource ID are preserved in
/// input order at the tail. Output order is first-seen ID order.
pub fn deduplicate_history_entries(entries: &[BundleEntry]) -> Vec<BundleEntry> {
    let mut winners: HashMap<String, BundleEntry> = HashMap::new();
    let mut id_order: Vec<String> = Vec::new();
    let mut without_id: Vec<BundleEntry> = Vec::new();

    for entry in entries {
        match entry_resource_id(entry) {
            Some(id) => match winners.get(&id) {
                Some(existing) if !wins_over(entry, existing) => {}
                Some(_) => {
                    winners.insert(id, entry.clone());
                }
                None => {
                    id_order.push(id.clone());
                    winners.insert(id, entry.clone());
                }
            },
            None => without_id.push(entry.clone()),
        }
    }

    let mut result: Vec<BundleEntry> = id_order
        .into_iter()
        .filter_map(|id| winners.remove(&id))
        .collect();
    result.extend(without_id);
    result
}

/// Resource ID of an entry: from the resource body, or for bodyless DELETE
/// entries from the request URL (falling back to the `fullUrl` tail).
fn entry_resource_id(entry: &BundleEntry) -> Option<String> {
    if let Some(resource) = &entry.resource {
        return resource_info(resource).ok().and_then(|info| info.id);
    }
    if entry
        .request
        .as_ref()
        .is_some_and(|request| request.method == "DELETE")
    {
        return delete_resource_id(entry);
    }
    None
}

fn delete_resource_id(entry: &BundleEntry) -> Option<String> {
    // Request URL shaped "ResourceType/id" or "ResourceType/id/_history/v".
    if let Some(request) = &entry.request {
        let parts: Vec<&str> = request.url.split('/').collect();
        if parts.len() >= 2 && !parts[1].is_empty() {
            return Some(parts[1].to_string());
        }
    }
    entry
        .full_url
        .as_deref()
        .and_then(|full_url| full_url.rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// True when `candidate` displaces `current` within one ID bucket.
///
/// Timestamped entries order by `meta.lastUpdated` and always beat
/// untimestamped ones. Between untimestamped entries, only a DELETE
/// displaces a non-DELETE; ties keep the earlier entry.
fn wins_over(candidate: &BundleEntry, current: &BundleEntry) -> bool {
    match (last_updated(candidate), last_updated(current)) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => is_delete(candidate) && !is_delete(current),
    }
}

fn is_delete(entry: &BundleEntry) -> bool {
    entry
        .request
        .as_ref()
        .is_some_and(|request| request.method == "DELETE")
}

fn last_updated(entry: &BundleEntry) -> Option<DateTime<FixedOffset>> {
    entry
        .resource
        .as_ref()
        .and_then(|resource| resource_info(resource).ok())
        .and_then(|info| info.last_updated)
}
