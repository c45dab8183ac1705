//! The FHIR REST client: paginated searches and transaction submission.

use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, instrument};
use url::Url;

use crate::auth::TokenProvider;
use crate::error::{Error, Result};
use crate::models::Bundle;
use crate::models::BundleEntry;

const FHIR_JSON: &str = "application/fhir+json";

/// Fixed search page size, so behavior is deterministic across FHIR servers
/// instead of relying on wildly varying server defaults.
pub const SEARCH_PAGE_SIZE: usize = 100;

/// Safety cap on entries accumulated across pages of one search.
pub const MAX_SEARCH_ENTRIES: usize = 1000;

/// Result of a paginated search: the first page (which carries server
/// metadata such as `Bundle.meta.lastUpdated`) plus the union of all pages'
/// entries.
#[derive(Debug)]
pub struct SearchSet {
    pub bundle: Bundle,
    pub entries: Vec<BundleEntry>,
}

/// Async client bound to one FHIR base URL.
#[derive(Clone)]
pub struct FhirClient {
    base_url: Url,
    http: reqwest::Client,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl FhirClient {
    /// Create a client for the given base URL.
    ///
    /// The base URL must be absolute `http` or `https`; anything else is a
    /// configuration error, not something to discover at request time.
    pub fn new(
        base_url: Url,
        http: reqwest::Client,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<Self> {
        if !matches!(base_url.scheme(), "http" | "https") || !base_url.has_host() {
            return Err(Error::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "expected an absolute http or https URL".to_string(),
            });
        }
        Ok(Self {
            base_url,
            http,
            token_provider,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Search the `_history` feed of a resource type, following pagination.
    ///
    /// `params` are passed through verbatim (notably `_since`).
    #[instrument(skip(self, params), fields(base = %self.base_url))]
    pub async fn search_history(
        &self,
        resource_type: &str,
        params: &[(&str, &str)],
    ) -> Result<SearchSet> {
        let path = format!("{resource_type}/_history");
        self.search(&path, params, "_history search").await
    }

    /// Search the current state of a resource type, following pagination.
    #[instrument(skip(self, params), fields(base = %self.base_url))]
    pub async fn search_current(
        &self,
        resource_type: &str,
        params: &[(&str, &str)],
    ) -> Result<SearchSet> {
        self.search(resource_type, params, "search").await
    }

    async fn search(
        &self,
        path: &str,
        params: &[(&str, &str)],
        context: &'static str,
    ) -> Result<SearchSet> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: "cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(path.split('/'));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("_count", &SEARCH_PAGE_SIZE.to_string());
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }

        let first = self.get_bundle(url, context).await?;
        let mut entries = first.entry.clone();
        if entries.len() >= MAX_SEARCH_ENTRIES {
            return Err(Error::TooManyEntries(entries.len()));
        }

        let mut next = first.next_link().map(str::to_string);
        while let Some(next_url) = next {
            let page_url = Url::parse(&next_url).map_err(|e| Error::InvalidBaseUrl {
                url: next_url.clone(),
                reason: format!("invalid next link: {e}"),
            })?;
            let page = self.get_bundle(page_url, context).await?;
            entries.extend(page.entry.iter().cloned());
            if entries.len() >= MAX_SEARCH_ENTRIES {
                return Err(Error::TooManyEntries(entries.len()));
            }
            next = page.next_link().map(str::to_string);
        }

        debug!(count = entries.len(), "search complete");
        Ok(SearchSet {
            bundle: first,
            entries,
        })
    }

    /// Submit a `type=transaction` bundle to the base URL root.
    ///
    /// The response bundle carries one `response` entry per request entry,
    /// each with an HTTP status string.
    #[instrument(skip(self, bundle), fields(base = %self.base_url, entries = bundle.entry.len()))]
    pub async fn submit_transaction(&self, bundle: &Bundle) -> Result<Bundle> {
        let body = serde_json::to_vec(bundle)?;
        let mut request = self
            .http
            .post(self.base_url.clone())
            .header(ACCEPT, FHIR_JSON)
            .header(CONTENT_TYPE, FHIR_JSON)
            .body(body);
        request = self.authorize(request).await?;

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                context: "transaction submission",
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Bundle>().await?)
    }

    async fn get_bundle(&self, url: Url, context: &'static str) -> Result<Bundle> {
        let mut request = self.http.get(url).header(ACCEPT, FHIR_JSON);
        request = self.authorize(request).await?;

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                context,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Bundle>().await?)
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match &self.token_provider {
            Some(provider) => {
                let token = provider.token().await?;
                Ok(request.bearer_auth(token))
            }
            None => Ok(request),
        }
    }
}
