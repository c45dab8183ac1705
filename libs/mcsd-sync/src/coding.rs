//! Fixed naming-system URIs and coding helpers.
//!
//! These URIs are part of the national addressing wire contract and must be
//! compared byte-for-byte.

use fhir_client::models::{CodeableConcept, Identifier};

/// Naming system of the Dutch URA organization identifier.
pub const URA_NAMING_SYSTEM: &str = "http://fhir.nl/fhir/NamingSystem/ura";

/// Coding system marking an Endpoint's payload capabilities.
pub const MCSD_DIRECTORY_PAYLOAD_SYSTEM: &str =
    "http://nuts-foundation.github.io/nl-generic-functions-ig/CodeSystem/nl-gf-data-exchange-capabilities";

/// Code identifying an Endpoint as an mCSD administration directory.
pub const MCSD_DIRECTORY_PAYLOAD_CODE: &str =
    "http://nuts-foundation.github.io/nl-generic-functions-ig/CapabilityStatement/nl-gf-admin-directory-update-client";

/// All identifiers in the URA naming system.
pub fn ura_identifiers(identifiers: &[Identifier]) -> Vec<&Identifier> {
    identifiers
        .iter()
        .filter(|id| id.system.as_deref() == Some(URA_NAMING_SYSTEM))
        .collect()
}

/// The single URA value of an identifier list, if present.
pub fn ura_value(identifiers: &[Identifier]) -> Option<&str> {
    ura_identifiers(identifiers)
        .first()
        .and_then(|id| id.value.as_deref())
}

/// True when any codeable concept carries the mCSD-directory coding.
pub fn includes_directory_coding(concepts: &[CodeableConcept]) -> bool {
    concepts.iter().any(|concept| {
        concept.coding.iter().any(|coding| {
            coding.system.as_deref() == Some(MCSD_DIRECTORY_PAYLOAD_SYSTEM)
                && coding.code.as_deref() == Some(MCSD_DIRECTORY_PAYLOAD_CODE)
        })
    })
}
