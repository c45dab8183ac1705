//! Async FHIR R4 REST client for directory synchronization.
//!
//! Covers the small slice of the FHIR REST API a directory update client
//! needs: `_history` and current-state searches with pagination, transaction
//! bundle submission, and deterministic source-URL construction for
//! `_source`-based conditional operations. Resources travel as raw
//! `serde_json::Value` so unknown content round-trips untouched; typed views
//! exist only for the handful of fields the client inspects.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod source_url;

pub use auth::{OAuth2ClientCredentials, OAuth2Config, StaticToken, TokenProvider};
pub use client::{FhirClient, SearchSet, MAX_SEARCH_ENTRIES, SEARCH_PAGE_SIZE};
pub use error::{Error, Result};
pub use models::{
    Bundle, BundleEntry, BundleEntryRequest, BundleEntryResponse, BundleLink, Meta, ResourceInfo,
};
pub use source_url::{build_source_url, build_source_url_from_reference};
