//! Reconciliation passes over billing receipts.
//!
//! Each pass authorizes against the fiscalization service, scans one
//! register's receipts in a single lifecycle status, and moves each receipt
//! forward according to the external document status. A file lock keyed by
//! the register's credential set serializes concurrent passes.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use cashier_core::error::PassError;
use cashier_core::lock::PassLock;
use chrono::Local;
use tracing::{info, instrument, warn};

use crate::config::RegisterConfig;
use crate::models::{FiscalFields, Receipt, ReceiptStatus};
use crate::services::database::{ReceiptStore, StoreError};
use crate::services::document::{build_document, BuildError};
use crate::services::modulkassa::{
    Credentials, DocumentDetails, DocumentStatus, ModulkassaClient, ServiceStatus,
};

/// Receipts older than this are left alone; the panel expires them itself.
const CANDIDATE_WINDOW_DAYS: i64 = 7;

/// Result of one pass.
#[derive(Debug)]
pub enum PassOutcome {
    /// The register was scanned; counts per disposition.
    Completed(PassSummary),
    /// The fiscalization service is not ready to take documents. Normal
    /// and retryable; no receipt was touched.
    ServiceNotReady(ServiceStatus),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub scanned: usize,
    pub waiting: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub left_in_place: usize,
}

/// What happened to a single receipt during a pass.
enum Disposition {
    Waiting,
    Succeeded,
    Failed,
    /// Transient condition; the receipt stays in its status for the next
    /// pass.
    LeftInPlace,
}

#[derive(Clone, Copy)]
enum PassAction {
    Submit,
    Query,
}

pub struct ReconcileEngine<S> {
    store: S,
    lock_dir: PathBuf,
    http_timeout: Duration,
}

impl<S: ReceiptStore> ReconcileEngine<S> {
    pub fn new(store: S, lock_dir: PathBuf, http_timeout: Duration) -> Self {
        Self {
            store,
            lock_dir,
            http_timeout,
        }
    }

    /// Submits documents for receipts the panel just created.
    #[instrument(skip(self))]
    pub async fn send(&self, register_id: i64) -> Result<PassOutcome, PassError> {
        self.pass(register_id, ReceiptStatus::New, PassAction::Submit)
            .await
    }

    /// Submits documents for receipts the panel pre-staged.
    #[instrument(skip(self))]
    pub async fn send_prepared(&self, register_id: i64) -> Result<PassOutcome, PassError> {
        self.pass(register_id, ReceiptStatus::Prepare, PassAction::Submit)
            .await
    }

    /// Polls the service for receipts awaiting a fiscalization outcome.
    #[instrument(skip(self))]
    pub async fn check(&self, register_id: i64) -> Result<PassOutcome, PassError> {
        self.pass(register_id, ReceiptStatus::Wait, PassAction::Query)
            .await
    }

    /// Verifies the register's credentials and the service's readiness
    /// without touching any receipt.
    #[instrument(skip(self))]
    pub async fn check_connection(&self, register_id: i64) -> Result<(), PassError> {
        let config = self.register_config(register_id).await?;
        let (_, status) = self.authorize(&config).await?;
        match status {
            ServiceStatus::Ready => Ok(()),
            other => Err(PassError::ServiceUnavailable {
                reason: format!("service status is {}", other.as_str()),
            }),
        }
    }

    async fn pass(
        &self,
        register_id: i64,
        source_status: ReceiptStatus,
        action: PassAction,
    ) -> Result<PassOutcome, PassError> {
        let config = self.register_config(register_id).await?;
        let _lock = self.acquire_lock(&config).await?;

        let (client, status) = self.authorize(&config).await?;
        match status {
            // Not yet taking documents; normal and retryable.
            ServiceStatus::Associated | ServiceStatus::Disabled => {
                info!(status = status.as_str(), "fiscalization service not ready");
                return Ok(PassOutcome::ServiceNotReady(status));
            }
            // Any other status, including a degraded one, still accepts
            // documents; per-receipt handling decides the rest.
            _ => {}
        }

        let since = Local::now().naive_local() - chrono::Duration::days(CANDIDATE_WINDOW_DAYS);
        let receipts = self
            .store
            .receipts_by_status(register_id, source_status, since)
            .await
            .map_err(store_error)?;

        let mut summary = PassSummary {
            scanned: receipts.len(),
            ..Default::default()
        };

        for receipt in &receipts {
            // One bad receipt never blocks the rest of the batch.
            let disposition = match self.process_receipt(&client, &config, receipt, action).await
            {
                Ok(d) => d,
                Err(err) => {
                    warn!(receipt_id = receipt.id, error = %err, "receipt skipped");
                    Disposition::LeftInPlace
                }
            };
            match disposition {
                Disposition::Waiting => summary.waiting += 1,
                Disposition::Succeeded => summary.succeeded += 1,
                Disposition::Failed => summary.failed += 1,
                Disposition::LeftInPlace => summary.left_in_place += 1,
            }
        }

        info!(
            register_id,
            scanned = summary.scanned,
            waiting = summary.waiting,
            succeeded = summary.succeeded,
            failed = summary.failed,
            left_in_place = summary.left_in_place,
            "pass completed"
        );

        Ok(PassOutcome::Completed(summary))
    }

    async fn process_receipt(
        &self,
        client: &ModulkassaClient,
        config: &RegisterConfig,
        receipt: &Receipt,
        action: PassAction,
    ) -> Result<Disposition, StoreError> {
        let external_id = receipt.external_doc_id();

        let details = match action {
            PassAction::Submit => {
                let items = self.store.line_items(receipt.id).await?;
                let document = match build_document(receipt, &items, &config.classifier()) {
                    Ok(doc) => doc,
                    Err(BuildError::Classify(err)) => {
                        // Terminal for the receipt; the operator has to fix
                        // the positions.
                        self.store
                            .mark_error(receipt.id, &external_id, &err.to_string())
                            .await?;
                        return Ok(Disposition::Failed);
                    }
                    Err(err @ BuildError::UnknownDocType(_)) => {
                        warn!(receipt_id = receipt.id, error = %err, "receipt not classifiable");
                        return Ok(Disposition::LeftInPlace);
                    }
                };
                match client.submit_document(&document).await {
                    Ok(details) => details,
                    Err(err) => {
                        warn!(receipt_id = receipt.id, error = %err, "submission failed");
                        return Ok(Disposition::LeftInPlace);
                    }
                }
            }
            PassAction::Query => match client.document_status(&external_id).await {
                Ok(details) => details,
                Err(err) => {
                    warn!(receipt_id = receipt.id, error = %err, "status query failed");
                    return Ok(Disposition::LeftInPlace);
                }
            },
        };

        let Some(details) = details else {
            return Ok(Disposition::LeftInPlace);
        };

        self.apply_status(receipt, &external_id, &details).await
    }

    async fn apply_status(
        &self,
        receipt: &Receipt,
        external_id: &str,
        details: &DocumentDetails,
    ) -> Result<Disposition, StoreError> {
        match details.status {
            DocumentStatus::Queued
            | DocumentStatus::Pending
            | DocumentStatus::WaitForCallback
            | DocumentStatus::Requeued => {
                self.store.mark_wait(receipt.id, external_id).await?;
                Ok(Disposition::Waiting)
            }
            DocumentStatus::Completed | DocumentStatus::Printed => {
                let fiscal = FiscalFields {
                    fn_number: details.fiscal.fn_number.clone(),
                    fiscal_document_number: details.fiscal.fn_doc_number,
                    fiscal_document_attribute: details.fiscal.fn_doc_mark,
                    receipt_date: details.fiscal.receipt_date.clone(),
                    receipt_date_tz: details.fiscal.receipt_date_tz.clone(),
                };
                self.store
                    .mark_success(receipt.id, external_id, &fiscal)
                    .await?;
                Ok(Disposition::Succeeded)
            }
            DocumentStatus::Failed => {
                let message = details
                    .failure
                    .message
                    .clone()
                    .or_else(|| details.message.clone())
                    .unwrap_or_else(|| "fiscalization failed".to_string());
                self.store
                    .mark_error(receipt.id, external_id, &message)
                    .await?;
                Ok(Disposition::Failed)
            }
            DocumentStatus::Unknown => {
                warn!(
                    receipt_id = receipt.id,
                    external_id, "unrecognized document status, leaving receipt untouched"
                );
                Ok(Disposition::LeftInPlace)
            }
        }
    }

    async fn register_config(&self, register_id: i64) -> Result<RegisterConfig, PassError> {
        self.store
            .register_config(register_id)
            .await
            .map_err(store_error)
    }

    /// Associates with the retail point and re-keys the client to the
    /// issued working credentials before querying readiness.
    async fn authorize(
        &self,
        config: &RegisterConfig,
    ) -> Result<(ModulkassaClient, ServiceStatus), PassError> {
        let client = ModulkassaClient::new(
            &config.url,
            Credentials {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            self.http_timeout,
        )
        .map_err(|e| PassError::AssociationFailed {
            reason: e.to_string(),
        })?;

        let issued = client
            .associate(&config.retail_point_id)
            .await
            .map_err(|e| PassError::AssociationFailed {
                reason: e.to_string(),
            })?;

        let client = client.with_credentials(Credentials {
            username: issued.user_name,
            password: secrecy::Secret::new(issued.password),
        });

        let status = client
            .service_status()
            .await
            .map_err(|e| PassError::ServiceUnavailable {
                reason: e.to_string(),
            })?;

        Ok((client, status))
    }

    async fn acquire_lock(&self, config: &RegisterConfig) -> Result<PassLock, PassError> {
        let dir = self.lock_dir.clone();
        let key = config.lock_key();
        // flock blocks the thread, so it runs off the async runtime.
        tokio::task::spawn_blocking(move || PassLock::acquire(&dir, &key))
            .await
            .map_err(|e| PassError::Lock(io::Error::new(io::ErrorKind::Other, e)))?
            .map_err(PassError::Lock)
    }
}

fn store_error(err: StoreError) -> PassError {
    PassError::Database(anyhow!(err))
}
