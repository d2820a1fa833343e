use thiserror::Error;

use crate::store::StoreError;

/// File-level failures. Any of these aborts the run before a row is validated.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("file type not supported: '{0}' (use .csv or .xlsx)")]
    UnsupportedFileType(String),

    #[error("malformed CSV at line {line}: {message}")]
    Csv { line: u64, message: String },

    #[error("could not read workbook: {0}")]
    Workbook(String),

    #[error("workbook has no sheets")]
    NoSheets,
}

/// Run-aborting ingestion failures. Per-row problems are never errors; they
/// travel as [`crate::validate::Rejection`] values.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("could not load farm/block catalog: {0}")]
    Catalog(#[source] StoreError),

    #[error("upload ledger write failed: {0}")]
    Ledger(#[source] StoreError),

    #[error("batch {batch} failed after {uploaded} rows were uploaded: {source}")]
    Batch {
        /// 1-based batch number
        batch: usize,
        uploaded: usize,
        #[source]
        source: StoreError,
    },

    #[error("upload cancelled after {uploaded} rows")]
    Cancelled { uploaded: usize },
}

impl IngestError {
    pub fn is_unsupported_file_type(&self) -> bool {
        matches!(self, IngestError::Decode(DecodeError::UnsupportedFileType(_)))
    }
}
