//! Catalog of known source directories.
//!
//! Ordered by insertion; iteration happens by index so that entries appended
//! by discovery during a run are visited in the same pass.

use std::sync::Mutex;

use url::Url;

use crate::error::RegistryError;

/// Resource types pulled from root (discoverable) directories.
pub const ROOT_DIRECTORY_RESOURCE_TYPES: &[&str] = &["Organization", "Endpoint"];

/// Default resource-type whitelist for discovered provider directories.
pub fn default_directory_resource_types() -> Vec<String> {
    [
        "Organization",
        "Endpoint",
        "Location",
        "HealthcareService",
        "PractitionerRole",
        "Practitioner",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// A remote FHIR directory to pull from.
///
/// Identity is `(base_url, authoritative_ura)`: the same FHIR server may be
/// registered once per organization it is authoritative for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDirectory {
    pub base_url: String,
    /// Resource types this directory may contribute.
    pub resource_types: Vec<String>,
    /// True for root directories: their Endpoints seed further registrations.
    pub discover: bool,
    /// Bundle `fullUrl` of the Endpoint that created this entry; empty for
    /// configured roots. Used for unregistration when that Endpoint is
    /// deleted at the source.
    pub source_entry_url: String,
    /// URA of the organization this directory is authoritative for; empty
    /// for root directories.
    pub authoritative_ura: String,
}

pub struct DirectoryRegistry {
    entries: Mutex<Vec<SourceDirectory>>,
    exclude: Vec<String>,
}

impl DirectoryRegistry {
    pub fn new(exclude: Vec<String>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            exclude,
        }
    }

    /// Register a directory. Idempotent on `(base_url, authoritative_ura)`;
    /// base URLs on the exclusion list are skipped silently.
    pub fn register(
        &self,
        base_url: &str,
        resource_types: Vec<String>,
        discover: bool,
        source_entry_url: &str,
        authoritative_ura: &str,
    ) -> Result<(), RegistryError> {
        let parsed = Url::parse(base_url).map_err(|e| RegistryError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
            return Err(RegistryError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "expected an absolute http or https URL".to_string(),
            });
        }

        let trimmed = trim_one_slash(base_url);
        if self
            .exclude
            .iter()
            .any(|excluded| trim_one_slash(excluded) == trimmed)
        {
            tracing::info!(
                directory = %base_url,
                "skipping mCSD directory registration: excluded by configuration"
            );
            return Ok(());
        }

        let mut entries = self.entries.lock().expect("registry lock poisoned");
        let exists = entries
            .iter()
            .any(|dir| dir.base_url == base_url && dir.authoritative_ura == authoritative_ura);
        if exists {
            return Ok(());
        }
        entries.push(SourceDirectory {
            base_url: base_url.to_string(),
            resource_types,
            discover,
            source_entry_url: source_entry_url.to_string(),
            authoritative_ura: authoritative_ura.to_string(),
        });
        tracing::info!(directory = %base_url, discover, "registered mCSD directory");
        Ok(())
    }

    /// Remove every entry created by the given bundle `fullUrl`. Called when
    /// an Endpoint is deleted at its source.
    pub fn unregister_by_source_entry_url(&self, full_url: &str) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        let before = entries.len();
        entries.retain(|dir| dir.source_entry_url != full_url);
        if entries.len() < before {
            tracing::info!(full_url, "unregistered mCSD directory after Endpoint deletion");
        }
    }

    /// Entry at `index`, or `None` past the end. Index-based access so a
    /// caller can pick up entries appended while it iterates.
    pub fn get(&self, index: usize) -> Option<SourceDirectory> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .get(index)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time copy of all entries.
    pub fn snapshot(&self) -> Vec<SourceDirectory> {
        self.entries.lock().expect("registry lock poisoned").clone()
    }
}

/// Trim at most one trailing slash, for exclusion-list comparison.
fn trim_one_slash(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}
