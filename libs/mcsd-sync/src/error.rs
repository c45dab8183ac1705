//! Error taxonomy of the synchronization engine.
//!
//! Three tiers: per-entry failures ([`ValidationError`], [`EntryError`])
//! become report warnings; per-source failures ([`SyncError`]) become report
//! errors and leave the cursor untouched; registry failures surface at
//! registration time only.

use thiserror::Error;

/// A source directory could not be registered.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid FHIR base URL ({url}): {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// A whole-source failure: the sync of this directory is abandoned and its
/// cursor is not advanced.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid FHIR base URL ({url}): {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to query {resource_type} history: {source}")]
    HistoryQuery {
        resource_type: String,
        #[source]
        source: fhir_client::Error,
    },

    #[error("410 Gone: history too old for {resource_type} and snapshot mode is disabled, cannot sync")]
    HistoryGone { resource_type: String },

    #[error("failed to query {resource_type}: {source}")]
    SnapshotQuery {
        resource_type: String,
        #[source]
        source: fhir_client::Error,
    },

    #[error("failed to query organizations for the authority tree: {0}")]
    OrganizationQuery(#[source] fhir_client::Error),

    #[error("authoritative organization validation failed: {0}")]
    TreeValidation(#[from] ValidationError),

    #[error("failed to apply update to query directory: {0}")]
    Apply(#[source] fhir_client::Error),
}

/// A per-resource validation failure; recorded as a warning, the entry is
/// skipped and the source's sync continues.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("resource type {0} not allowed")]
    ResourceTypeNotAllowed(String),

    #[error("organization {id} carries {count} URA identifiers, expected exactly one")]
    RootUraCount { id: String, count: usize },

    #[error("Organization/{id}: URA does not match an authoritative organization for this directory")]
    OrganizationNotAuthoritative { id: String },

    #[error("Organization/{id}: no URA identifier and no partOf chain to an authoritative organization")]
    OrganizationUnlinked { id: String },

    #[error("HealthcareService/{id}: providedBy missing or not in the authoritative organization tree")]
    OrphanHealthcareService { id: String },

    #[error("Location/{id}: managingOrganization missing or not in the authoritative organization tree")]
    OrphanLocation { id: String },

    #[error("PractitionerRole/{id}: organization missing or not in the authoritative organization tree")]
    OrphanPractitionerRole { id: String },

    #[error("Endpoint/{id}: not referenced by any accepted Organization or HealthcareService")]
    UnownedEndpoint { id: String },

    #[error("invalid resource: {0}")]
    InvalidResource(String),
}

/// A single bundle entry could not be turned into a transaction entry.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("missing 'fullUrl' field")]
    MissingFullUrl,

    #[error("missing 'request' field")]
    MissingRequest,

    #[error("missing 'resource' field for non-DELETE operation")]
    MissingResource,

    #[error("resource missing ID field")]
    MissingResourceId,

    #[error("not a valid resourceType")]
    MissingResourceType,

    #[error("invalid DELETE URL format: {0}")]
    InvalidDeleteUrl(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to build source URL: {0}")]
    SourceUrl(#[from] fhir_client::Error),
}
