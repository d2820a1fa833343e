//! One ingestion run: file bytes in, upserted observations and a ledger
//! record out.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::{upload_in_batches, BATCH_SIZE, MAX_BATCH_SIZE};
use crate::cancel::CancellationToken;
use crate::catalog::CatalogResolver;
use crate::decode::{decode_file, FileKind};
use crate::error::IngestError;
use crate::ledger::{NewUpload, UploadUpdate};
use crate::store::{CatalogSource, ObservationStore, UploadLedger};
use crate::validate::{validate_rows, Rejection, ValidationReport};

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub user_id: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Uploaded,
    /// Every row was rejected (or the file had none); nothing was sent
    NothingToUpload,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub upload_id: Uuid,
    pub total: usize,
    pub valid: usize,
    pub rejected: usize,
    pub uploaded: usize,
    pub outcome: IngestOutcome,
    pub errors: Vec<Rejection>,
}

/// Runs ingestions against a catalog, an observation store and a ledger.
/// A fresh catalog snapshot is taken for every run.
#[derive(Clone)]
pub struct Ingestor {
    catalog: Arc<dyn CatalogSource>,
    observations: Arc<dyn ObservationStore>,
    ledger: Arc<dyn UploadLedger>,
    batch_size: usize,
}

impl Ingestor {
    /// All three roles served by one store
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: CatalogSource + ObservationStore + UploadLedger + 'static,
    {
        Self {
            catalog: store.clone(),
            observations: store.clone(),
            ledger: store,
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn ledger(&self) -> &dyn UploadLedger {
        self.ledger.as_ref()
    }

    /// Decode and validate without touching the ledger or the store
    pub async fn validate_only(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ValidationReport, IngestError> {
        let rows = decode_file(filename, bytes)?;
        let catalog = CatalogResolver::load(self.catalog.as_ref())
            .await
            .map_err(IngestError::Catalog)?;
        Ok(validate_rows(&rows, &catalog))
    }

    pub async fn ingest(
        &self,
        request: IngestRequest,
        progress: &mut (dyn FnMut(u8) + Send),
        cancel: &CancellationToken,
    ) -> Result<IngestSummary, IngestError> {
        // unsupported files never get a ledger entry
        FileKind::from_filename(&request.filename)?;

        let upload_id = self
            .ledger
            .create_upload_record(&NewUpload {
                user_id: request.user_id.clone(),
                filename: request.filename.clone(),
            })
            .await
            .map_err(IngestError::Ledger)?;
        info!(%upload_id, filename = %request.filename, user = %request.user_id, "ingestion started");

        let report = match self.validate_only(&request.filename, &request.bytes).await {
            Ok(report) => report,
            Err(e) => return Err(self.fail(upload_id, e).await),
        };
        let (total, valid, rejected) = (report.total(), report.valid.len(), report.errors.len());
        info!(%upload_id, total, valid, rejected, "rows validated");

        if let Err(e) = self
            .ledger
            .update_upload_record(upload_id, &UploadUpdate::counts(total, valid, rejected))
            .await
        {
            return Err(self.fail(upload_id, IngestError::Ledger(e)).await);
        }

        let (uploaded, outcome) = if valid == 0 {
            info!(%upload_id, "no valid rows, nothing to upload");
            (0, IngestOutcome::NothingToUpload)
        } else {
            match upload_in_batches(
                self.observations.as_ref(),
                &report.valid,
                self.batch_size,
                progress,
                cancel,
            )
            .await
            {
                Ok(n) => (n, IngestOutcome::Uploaded),
                Err(e) => return Err(self.fail(upload_id, e).await),
            }
        };

        if let Err(e) = self
            .ledger
            .update_upload_record(upload_id, &UploadUpdate::done())
            .await
        {
            // observations are committed at this point; only the record is off
            return Err(self.fail(upload_id, IngestError::Ledger(e)).await);
        }
        info!(%upload_id, uploaded, "ingestion finished");

        Ok(IngestSummary {
            upload_id,
            total,
            valid,
            rejected,
            uploaded,
            outcome,
            errors: report.errors,
        })
    }

    /// Record `err` on the ledger entry and hand it back. A ledger write
    /// failure here is logged; the run error is what the caller sees.
    async fn fail(&self, upload_id: Uuid, err: IngestError) -> IngestError {
        warn!(%upload_id, error = %err, "ingestion failed");
        if let Err(e) = self
            .ledger
            .update_upload_record(upload_id, &UploadUpdate::failed(err.to_string()))
            .await
        {
            warn!(%upload_id, error = %e, "could not mark upload as failed");
        }
        err
    }
}
