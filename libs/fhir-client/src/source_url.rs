//! Deterministic source-URL construction.
//!
//! A source URL is the stable fingerprint `{base}/{ResourceType}/{id}` of a
//! resource at its authoritative directory. The query directory stores it in
//! `meta.source`, which makes conditional `?_source=` operations idempotent
//! across runs and across server-assigned id translations.

use url::Url;

use crate::error::{Error, Result};

/// Build the source URL for a resource identified by type and id.
pub fn build_source_url(base_url: &str, resource_type: &str, id: &str) -> Result<String> {
    let base = validated_base(base_url)?;
    Ok(format!("{base}/{resource_type}/{id}"))
}

/// Build the source URL from a relative reference of the form `Type/id`.
pub fn build_source_url_from_reference(base_url: &str, reference: &str) -> Result<String> {
    let base = validated_base(base_url)?;
    Ok(format!("{base}/{reference}"))
}

/// Validate that the base is an absolute `http(s)` URL and strip one
/// trailing slash so concatenation stays canonical.
fn validated_base(base_url: &str) -> Result<&str> {
    let parsed = Url::parse(base_url).map_err(|e| Error::InvalidBaseUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
        return Err(Error::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: "expected an absolute http or https URL".to_string(),
        });
    }
    Ok(base_url.strip_suffix('/').unwrap_or(base_url))
}
