//! Transport seam for the verification service
//!
//! The client talks to the backend through the [`VerifyTransport`] trait so
//! the request-layer semantics (pooling, coalescing, correlation) can be
//! tested without a network. [`HttpTransport`] is the production
//! implementation over `reqwest`.

use crate::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use veracite_citations::{Citation, Selection, Verification};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Wire types
// ============================================================================

/// One file to upload as a source attachment.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub custom_id: Option<String>,
}

impl FileUpload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            filename: None,
            custom_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub page_count: Option<u32>,
    pub byte_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub attachment_id: String,
    /// Leading portion of the text the service extracted from the file.
    pub extracted_text_portion: Option<String>,
    #[serde(default)]
    pub metadata: UploadMetadata,
}

/// Citation content as the verification call wants it, minus everything that
/// is identity rather than content (labels, annotations).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCitation {
    pub full_phrase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_ids: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timestamps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl From<&Citation> for WireCitation {
    fn from(citation: &Citation) -> Self {
        match citation {
            Citation::Document(c) | Citation::Url(c) => Self {
                full_phrase: c.full_phrase.clone(),
                anchor_text: c.anchor_text.clone(),
                page_number: c.page_number,
                line_ids: c.line_ids.clone(),
                timestamps: Vec::new(),
                selection: c.selection,
            },
            Citation::AudioVideo(c) => Self {
                full_phrase: c.full_phrase.clone(),
                anchor_text: None,
                page_number: None,
                line_ids: Vec::new(),
                timestamps: c.timestamps.clone(),
                selection: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub attachment_id: String,
    /// Label → citation content. Labels are a wire artifact; the client
    /// re-keys results by content before returning them.
    pub citations: BTreeMap<String, WireCitation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub verifications: HashMap<String, Verification>,
}

// ============================================================================
// Transport trait
// ============================================================================

#[async_trait]
pub trait VerifyTransport: Send + Sync {
    async fn upload(&self, file: FileUpload) -> Result<UploadResponse, ClientError>;
    async fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, ClientError>;
}

// ============================================================================
// HTTP transport
// ============================================================================

pub struct HttpTransport {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(api_url: String, api_key: String) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self {
            http,
            api_url,
            api_key,
        })
    }
}

#[async_trait]
impl VerifyTransport for HttpTransport {
    async fn upload(&self, file: FileUpload) -> Result<UploadResponse, ClientError> {
        let mut part = reqwest::multipart::Part::bytes(file.bytes);
        if let Some(filename) = file.filename {
            part = part.file_name(filename);
        }
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(custom_id) = file.custom_id {
            form = form.text("custom_id", custom_id);
        }

        let response = self
            .http
            .post(format!("{}/v1/attachments", self.api_url))
            .header("x-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Upload(error_message(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    async fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, ClientError> {
        let response = self
            .http
            .post(format!("{}/v1/verify", self.api_url))
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Verification(error_message(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

/// Extract the human-readable message from an error response. The service
/// sends `{"error": {"message": …}}`; fall back to the raw body, then to the
/// status line.
async fn error_message(response: reqwest::Response) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
        if let Some(message) = parsed.error.and_then(|e| e.message) {
            return message;
        }
    }
    if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        body
    }
}
