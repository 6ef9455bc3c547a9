//! Scripted in-memory doubles for the origin API and the export download.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use rrad_core::gid;
use rrad_storage::{ExportDownloader, FetchError};
use tokio::sync::Mutex;

use crate::{
    AdapterError, BulkOperation, BulkOperationRef, BulkOperationStatus, BulkStart, CommerceApi,
    RefundDetail, ReturnDetail, UserError,
};

#[derive(Default)]
struct Script {
    rejection: Option<Vec<UserError>>,
    start_error: Option<String>,
    start_calls: usize,
    operations: HashMap<String, BulkOperation>,
    refunds: HashMap<String, RefundDetail>,
    returns: HashMap<String, ReturnDetail>,
    failing_ids: HashSet<String>,
    currency: Option<String>,
    detail_calls: Vec<String>,
}

/// A [`CommerceApi`] that answers from a script set up by the test.
#[derive(Default)]
pub struct ScriptedCommerceApi {
    script: Mutex<Script>,
    start_delay: Duration,
    detail_delay: Duration,
}

impl ScriptedCommerceApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every export submission for `delay` before answering.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Hold every detail lookup for `delay` before answering.
    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
        self
    }

    pub async fn reject_starts(&self, errors: Vec<UserError>) {
        self.script.lock().await.rejection = Some(errors);
    }

    pub async fn fail_starts(&self, message: impl Into<String>) {
        self.script.lock().await.start_error = Some(message.into());
    }

    pub async fn set_operation(&self, operation: BulkOperation) {
        self.script
            .lock()
            .await
            .operations
            .insert(operation.id.clone(), operation);
    }

    pub async fn add_refund(&self, detail: RefundDetail) {
        self.script
            .lock()
            .await
            .refunds
            .insert(detail.id.clone(), detail);
    }

    pub async fn add_return(&self, detail: ReturnDetail) {
        self.script
            .lock()
            .await
            .returns
            .insert(detail.id.clone(), detail);
    }

    /// Any detail lookup for `id` fails with an API error.
    pub async fn fail_detail(&self, id: impl Into<String>) {
        self.script.lock().await.failing_ids.insert(id.into());
    }

    pub async fn set_currency(&self, currency: impl Into<String>) {
        self.script.lock().await.currency = Some(currency.into());
    }

    pub async fn start_calls(&self) -> usize {
        self.script.lock().await.start_calls
    }

    /// Ids passed to refund/return detail lookups, in call order.
    pub async fn detail_calls(&self) -> Vec<String> {
        self.script.lock().await.detail_calls.clone()
    }

    async fn detail_lookup(&self, id: &str) -> Result<(), AdapterError> {
        if !self.detail_delay.is_zero() {
            tokio::time::sleep(self.detail_delay).await;
        }
        let mut script = self.script.lock().await;
        script.detail_calls.push(id.to_string());
        if script.failing_ids.contains(id) {
            return Err(AdapterError::Message(format!("scripted failure for {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CommerceApi for ScriptedCommerceApi {
    async fn start_bulk_export(&self, _query: &str) -> Result<BulkStart, AdapterError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }

        let mut script = self.script.lock().await;
        if let Some(message) = &script.start_error {
            return Err(AdapterError::Message(message.clone()));
        }
        if let Some(errors) = &script.rejection {
            return Ok(BulkStart::Rejected(errors.clone()));
        }

        script.start_calls += 1;
        let id = gid("BulkOperation", script.start_calls);
        script
            .operations
            .insert(id.clone(), running_operation(&id));
        Ok(BulkStart::Accepted(BulkOperationRef {
            id,
            status: BulkOperationStatus::Created,
        }))
    }

    async fn bulk_operation(&self, operation_id: &str) -> Result<Option<BulkOperation>, AdapterError> {
        Ok(self.script.lock().await.operations.get(operation_id).cloned())
    }

    async fn refund_detail(&self, refund_id: &str) -> Result<Option<RefundDetail>, AdapterError> {
        self.detail_lookup(refund_id).await?;
        Ok(self.script.lock().await.refunds.get(refund_id).cloned())
    }

    async fn return_detail(&self, return_id: &str) -> Result<Option<ReturnDetail>, AdapterError> {
        self.detail_lookup(return_id).await?;
        Ok(self.script.lock().await.returns.get(return_id).cloned())
    }

    async fn shop_currency(&self) -> Result<Option<String>, AdapterError> {
        Ok(self.script.lock().await.currency.clone())
    }
}

pub fn running_operation(id: &str) -> BulkOperation {
    BulkOperation {
        id: id.to_string(),
        status: BulkOperationStatus::Running,
        error_code: None,
        object_count: None,
        url: None,
        partial_data_url: None,
    }
}

pub fn completed_operation(id: &str, url: Option<&str>, object_count: u64) -> BulkOperation {
    BulkOperation {
        status: BulkOperationStatus::Completed,
        object_count: Some(object_count),
        url: url.map(str::to_string),
        ..running_operation(id)
    }
}

pub fn failed_operation(id: &str, status: BulkOperationStatus, error_code: &str) -> BulkOperation {
    BulkOperation {
        status,
        error_code: Some(error_code.to_string()),
        ..running_operation(id)
    }
}

/// Export files served from memory; unknown urls answer 404.
#[derive(Default)]
pub struct ScriptedExports {
    files: Mutex<HashMap<String, String>>,
    downloads: Mutex<Vec<String>>,
}

impl ScriptedExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn serve(&self, url: impl Into<String>, body: impl Into<String>) {
        self.files.lock().await.insert(url.into(), body.into());
    }

    pub async fn downloads(&self) -> Vec<String> {
        self.downloads.lock().await.clone()
    }
}

#[async_trait]
impl ExportDownloader for ScriptedExports {
    async fn download(&self, url: &str) -> Result<String, FetchError> {
        self.downloads.lock().await.push(url.to_string());
        self.files
            .lock()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
    }
}
