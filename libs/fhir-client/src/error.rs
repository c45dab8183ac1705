//! Error types for the FHIR client.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The configured base URL is not an absolute `http(s)` URL.
    #[error("invalid FHIR base URL ({url}): {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// Network-level failure (DNS, TLS, connection, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success HTTP status.
    #[error("{context}: server returned HTTP {status}: {body}")]
    Status {
        context: &'static str,
        status: u16,
        body: String,
    },

    /// A bearer token could not be obtained from the token provider.
    #[error("failed to obtain access token: {0}")]
    Token(String),

    /// Pagination accumulated more entries than the safety limit allows.
    #[error("too many entries ({0}), aborting to prevent excessive memory usage")]
    TooManyEntries(usize),

    /// A resource payload could not be interpreted.
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// True when the error indicates a 410 Gone response, i.e. the server can
    /// no longer serve the requested `_history` window.
    pub fn is_gone(&self) -> bool {
        if let Error::Status { status, .. } = self {
            if *status == 410 {
                return true;
            }
        }
        let message = self.to_string().to_lowercase();
        message.contains("410") || message.contains("gone")
    }
}
