//! Mite-monitoring upload ingestion: decode a field spreadsheet, validate
//! each row against the farm/block catalog and upsert the valid
//! observations in batches, keeping an upload ledger entry per file.

pub mod batch;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod decode;
pub mod error;
pub mod ledger;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod store;
pub mod validate;

pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{DecodeError, IngestError};
pub use pipeline::{IngestOutcome, IngestRequest, IngestSummary, Ingestor};
