//! The citation verification client
//!
//! Owns the upload worker pool and the in-flight verification registry.
//! Concurrency model: registration in the registry happens under a
//! synchronous lock with no await inside the critical section, so two
//! concurrent callers can never race past the coalescing check.

use crate::transport::{FileUpload, HttpTransport, UploadResponse, VerifyRequest, VerifyTransport};
use crate::{ClientConfig, ClientError, WireCitation};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use veracite_citations::{citation_key, request_fingerprint, Citation, Verification};

/// Verification results re-keyed by citation content key.
pub type VerificationsByKey = HashMap<String, Verification>;

type InflightVerify = Shared<BoxFuture<'static, Result<VerificationsByKey, ClientError>>>;

pub struct CitationClient {
    transport: Arc<dyn VerifyTransport>,
    upload_slots: Arc<Semaphore>,
    /// Fingerprint → the single outstanding call for that exact request.
    /// Entries live only for the duration of one network call.
    inflight: Arc<Mutex<HashMap<String, InflightVerify>>>,
}

impl CitationClient {
    /// Build a client over the HTTP transport. Fails fast on an empty API
    /// key; no network activity happens here.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.api_key.trim().is_empty() {
            return Err(ClientError::MissingApiKey);
        }
        let transport =
            HttpTransport::new(config.resolved_api_url(), config.api_key.clone())?;
        Ok(Self::with_transport(
            Arc::new(transport),
            config.resolved_upload_concurrency(),
        ))
    }

    /// Build a client over any transport; used by tests and embedders that
    /// bring their own wire layer.
    pub fn with_transport(
        transport: Arc<dyn VerifyTransport>,
        max_upload_concurrency: usize,
    ) -> Self {
        Self {
            transport,
            upload_slots: Arc::new(Semaphore::new(max_upload_concurrency.max(1))),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Upload one source file. An empty payload is rejected synchronously,
    /// before any network attempt. Non-success responses surface as
    /// [`ClientError::Upload`] carrying the server's message; never retried.
    pub async fn upload_file(&self, file: FileUpload) -> Result<UploadResponse, ClientError> {
        validate_upload(&file)?;
        self.transport.upload(file).await
    }

    /// Upload many files through the fixed-width worker pool. The result is
    /// index-aligned with the input regardless of completion order: each
    /// upload writes into a pre-allocated slot. First failure propagates;
    /// uploads that already completed are not rolled back.
    pub async fn prepare_files(
        &self,
        files: Vec<FileUpload>,
    ) -> Result<Vec<UploadResponse>, ClientError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut slots: Vec<Option<UploadResponse>> = (0..files.len()).map(|_| None).collect();
        let mut tasks: JoinSet<(usize, Result<UploadResponse, ClientError>)> = JoinSet::new();

        for (index, file) in files.into_iter().enumerate() {
            let transport = Arc::clone(&self.transport);
            let pool = Arc::clone(&self.upload_slots);
            tasks.spawn(async move {
                let result = match pool.acquire_owned().await {
                    Ok(_permit) => match validate_upload(&file) {
                        Ok(()) => transport.upload(file).await,
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(ClientError::Network(e.to_string())),
                };
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| ClientError::Network(e.to_string()))?;
            slots[index] = Some(result?);
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.expect("every upload task reports its slot"))
            .collect())
    }

    /// Submit a citation batch for verification, coalescing with any
    /// identical outstanding request.
    ///
    /// The request fingerprint covers the attachment and the citation
    /// *content set* — never the caller's map labels — so re-numbering
    /// citations joins the same in-flight call, while a change to any
    /// content field (`line_ids`, `selection`, …) issues a distinct one.
    /// Results come back keyed by citation content key. An empty map
    /// short-circuits with an empty result and no network call.
    pub async fn verify_attachment(
        &self,
        attachment_id: &str,
        citations: &HashMap<String, Citation>,
    ) -> Result<VerificationsByKey, ClientError> {
        if citations.is_empty() {
            return Ok(HashMap::new());
        }

        let fingerprint = request_fingerprint(attachment_id, citations.values());

        // Lookup and registration are a single synchronous critical section;
        // the first await point comes after the entry is registered.
        let call = {
            let mut inflight = self.inflight.lock();
            if let Some(pending) = inflight.get(&fingerprint) {
                pending.clone()
            } else {
                let transport = Arc::clone(&self.transport);
                let registry = Arc::clone(&self.inflight);
                let attachment_id = attachment_id.to_string();
                let entries: BTreeMap<String, Citation> = citations
                    .iter()
                    .map(|(label, citation)| (label.clone(), citation.clone()))
                    .collect();
                let key = fingerprint.clone();

                let call = async move {
                    let result = run_verify(transport, attachment_id, entries).await;
                    // Settled (either way): drop the registry entry so the
                    // next identical request starts fresh.
                    registry.lock().remove(&key);
                    result
                }
                .boxed()
                .shared();

                inflight.insert(fingerprint, call.clone());
                call
            }
        };

        call.await
    }

    /// Number of requests currently registered as in flight.
    pub fn inflight_len(&self) -> usize {
        self.inflight.lock().len()
    }
}

fn validate_upload(file: &FileUpload) -> Result<(), ClientError> {
    if file.bytes.is_empty() {
        return Err(ClientError::InvalidInput(
            "upload payload must be non-empty binary data".to_string(),
        ));
    }
    Ok(())
}

/// Issue the wire call and re-key the response from labels to content keys.
async fn run_verify(
    transport: Arc<dyn VerifyTransport>,
    attachment_id: String,
    entries: BTreeMap<String, Citation>,
) -> Result<VerificationsByKey, ClientError> {
    let request = VerifyRequest {
        attachment_id,
        citations: entries
            .iter()
            .map(|(label, citation)| (label.clone(), WireCitation::from(citation)))
            .collect(),
    };

    let response = transport.verify(request).await?;

    let mut by_key = HashMap::with_capacity(response.verifications.len());
    for (label, verification) in response.verifications {
        match entries.get(&label) {
            Some(citation) => {
                by_key.insert(citation_key(citation), verification);
            }
            None => tracing::warn!(
                target: "veracite::client",
                %label,
                "verification result for a label we never sent; dropped"
            ),
        }
    }
    Ok(by_key)
}
