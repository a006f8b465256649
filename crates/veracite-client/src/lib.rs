//! Veracite Client: the request layer of the verification pipeline
//!
//! Talks to the external verification service under two guarantees:
//!
//! - **Bounded upload concurrency**: source files go through a fixed-width
//!   worker pool (default 5); excess uploads queue FIFO and results come back
//!   index-aligned with the input regardless of completion order.
//! - **Exactly-once-in-flight verification**: concurrent requests for the
//!   same attachment and the same citation *content* coalesce onto a single
//!   outstanding network call, fingerprinted by content rather than by the
//!   caller's labels. Entries leave the in-flight registry the instant the
//!   call settles, so nothing is ever replayed from a stale result.
//!
//! No automatic retries, no built-in cancellation: transport failures reach
//! the caller carrying the server's message, and a later identical request
//! starts fresh.

pub mod client;
pub mod transport;

use thiserror::Error;

/// Default verification service endpoint.
pub const DEFAULT_API_URL: &str = "https://api.veracite.dev";

/// Default upload worker-pool width.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 5;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Required; construction fails on an empty key.
    pub api_key: String,
    /// Service base URL; trailing slash is stripped. Defaults to
    /// [`DEFAULT_API_URL`].
    pub api_url: Option<String>,
    /// Upload pool width. Defaults to [`DEFAULT_UPLOAD_CONCURRENCY`].
    pub max_upload_concurrency: Option<usize>,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: None,
            max_upload_concurrency: None,
        }
    }

    pub fn resolved_api_url(&self) -> String {
        self.api_url
            .as_deref()
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn resolved_upload_concurrency(&self) -> usize {
        self.max_upload_concurrency
            .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY)
            .max(1)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Client error taxonomy. `Clone` so coalesced callers can all observe the
/// same settled failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Configuration error, raised at construction and never caught
    /// internally.
    #[error("API key is required")]
    MissingApiKey,
    /// Input validation failure, raised synchronously before any network
    /// attempt.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Non-success upload response; carries the server's message verbatim.
    #[error("upload failed: {0}")]
    Upload(String),
    /// Non-success verification response; carries the server's message
    /// verbatim.
    #[error("verification failed: {0}")]
    Verification(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{CitationClient, VerificationsByKey};
pub use transport::{
    FileUpload, HttpTransport, UploadMetadata, UploadResponse, VerifyRequest, VerifyResponse,
    VerifyTransport, WireCitation,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_trailing_slash_is_stripped() {
        let mut config = ClientConfig::new("key");
        config.api_url = Some("https://verify.example.com/".to_string());
        assert_eq!(config.resolved_api_url(), "https://verify.example.com");
    }

    #[test]
    fn api_url_defaults_when_unset() {
        assert_eq!(ClientConfig::new("key").resolved_api_url(), DEFAULT_API_URL);
    }

    #[test]
    fn upload_concurrency_defaults_and_clamps() {
        assert_eq!(ClientConfig::new("key").resolved_upload_concurrency(), 5);

        let mut config = ClientConfig::new("key");
        config.max_upload_concurrency = Some(0);
        assert_eq!(config.resolved_upload_concurrency(), 1);

        config.max_upload_concurrency = Some(12);
        assert_eq!(config.resolved_upload_concurrency(), 12);
    }
}
