//! Document ingestion client.
//!
//! The ingestion service is an external, opaque collaborator: it receives an
//! uploaded spreadsheet plus dispatch metadata, writes product rows into the
//! catalog on its own, and returns the dispatch id and foreign-currency FOB
//! total. This crate only consumes that return value; it never inspects or
//! validates the spreadsheet.
//!
//! The trait abstraction keeps the wizard testable without a live service:
//! production uses [`HttpIngestionClient`], tests use [`MockIngestionClient`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::dispatch::{DispatchId, DispatchNumber};
use crate::error::{CosteoError, Result};
use crate::money::Money;

/// Whether an upload belongs to the pool's primary or secondary dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchRole {
    Primary,
    Secondary,
}

/// The uploaded spreadsheet, passed through to the ingestion service as-is.
#[derive(Debug, Clone)]
pub struct SpreadsheetDocument {
    pub filename: String,
    pub content: Vec<u8>,
}

/// One dispatch's upload: document plus the metadata the ingestion service
/// needs to attribute the product rows it writes.
#[derive(Debug, Clone)]
pub struct DispatchUpload {
    pub dispatch_number: DispatchNumber,
    pub description: Option<String>,
    pub origin: String,
    pub role: DispatchRole,
    /// 1 for a single dispatch, 2 for a dual-dispatch pool.
    pub pool_size: u8,
    pub document: SpreadsheetDocument,
}

/// What the ingestion service reports back after writing the product rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReceipt {
    pub dispatch_id: DispatchId,
    pub total_fob_foreign: Money,
}

/// Trait for submitting dispatch documents to the ingestion service.
#[async_trait]
pub trait IngestionClient: Send + Sync {
    /// Submit one dispatch's document and await its receipt.
    ///
    /// # Errors
    /// Returns an error if the service is unreachable, times out, or rejects
    /// the upload.
    async fn submit(&self, upload: DispatchUpload) -> Result<IngestionReceipt>;
}

// ============================================================================
// Production implementation using reqwest
// ============================================================================

/// Metadata part sent alongside the document.
#[derive(Debug, Serialize)]
struct UploadMetadata<'a> {
    dispatch_number: &'a str,
    description: Option<&'a str>,
    origin: &'a str,
    role: DispatchRole,
    pool_size: u8,
}

/// HTTP client for the ingestion service.
#[derive(Clone)]
pub struct HttpIngestionClient {
    client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpIngestionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout_ms: 120_000,
        }
    }

    /// Set the per-upload timeout in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[async_trait]
impl IngestionClient for HttpIngestionClient {
    #[tracing::instrument(skip(self, upload), fields(dispatch_number = %upload.dispatch_number, role = ?upload.role))]
    async fn submit(&self, upload: DispatchUpload) -> Result<IngestionReceipt> {
        let url = format!("{}/ingestions", self.base_url);

        let metadata = UploadMetadata {
            dispatch_number: upload.dispatch_number.as_str(),
            description: upload.description.as_deref(),
            origin: &upload.origin,
            role: upload.role,
            pool_size: upload.pool_size,
        };
        let metadata_json = serde_json::to_string(&metadata)?;

        let form = reqwest::multipart::Form::new()
            .text("metadata", metadata_json)
            .part(
                "document",
                reqwest::multipart::Part::bytes(upload.document.content)
                    .file_name(upload.document.filename.clone()),
            );

        tracing::debug!(url = %url, filename = %upload.document.filename, "submitting dispatch document");

        let response = self
            .client
            .post(&url)
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "ingestion service rejected upload");
            return Err(CosteoError::ExternalService(anyhow::anyhow!(
                "ingestion service returned {status}: {body}"
            )));
        }

        let receipt: IngestionReceipt = response.json().await?;
        tracing::info!(
            dispatch_id = %receipt.dispatch_id,
            total_fob_foreign = %receipt.total_fob_foreign,
            "dispatch document ingested"
        );
        Ok(receipt)
    }
}

// ============================================================================
// Test/mock implementation
// ============================================================================

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Record of a call made to the mock ingestion client.
#[derive(Debug, Clone)]
pub struct MockUpload {
    pub dispatch_number: DispatchNumber,
    pub role: DispatchRole,
    pub pool_size: u8,
    pub filename: String,
}

/// Mock ingestion client for testing.
///
/// Receipts are keyed by dispatch number and consumed in FIFO order; uploads
/// are recorded so tests can assert on ordering and metadata.
#[derive(Clone, Default)]
pub struct MockIngestionClient {
    receipts: Arc<Mutex<HashMap<DispatchNumber, Vec<Result<IngestionReceipt>>>>>,
    uploads: Arc<Mutex<Vec<MockUpload>>>,
}

impl MockIngestionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a receipt for a dispatch number.
    pub fn add_receipt(&self, number: impl Into<DispatchNumber>, receipt: IngestionReceipt) {
        self.receipts
            .lock()
            .entry(number.into())
            .or_default()
            .push(Ok(receipt));
    }

    /// Queue a failure for a dispatch number.
    pub fn add_failure(&self, number: impl Into<DispatchNumber>, message: &str) {
        self.receipts
            .lock()
            .entry(number.into())
            .or_default()
            .push(Err(CosteoError::ExternalService(anyhow::anyhow!(
                "{message}"
            ))));
    }

    /// All uploads submitted so far, in order.
    pub fn uploads(&self) -> Vec<MockUpload> {
        self.uploads.lock().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }
}

#[async_trait]
impl IngestionClient for MockIngestionClient {
    async fn submit(&self, upload: DispatchUpload) -> Result<IngestionReceipt> {
        self.uploads.lock().push(MockUpload {
            dispatch_number: upload.dispatch_number.clone(),
            role: upload.role,
            pool_size: upload.pool_size,
            filename: upload.document.filename.clone(),
        });

        let queued = {
            let mut receipts = self.receipts.lock();
            match receipts.get_mut(&upload.dispatch_number) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };

        match queued {
            Some(result) => result,
            None => Err(CosteoError::ExternalService(anyhow::anyhow!(
                "no mock receipt configured for dispatch {}",
                upload.dispatch_number
            ))),
        }
    }
}
