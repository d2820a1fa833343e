//! Sequential batched upsert of validated observations.

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::IngestError;
use crate::model::Observation;
use crate::store::ObservationStore;

pub const BATCH_SIZE: usize = 500;
/// 12 bound parameters per row must stay under Postgres' 65535 limit
pub const MAX_BATCH_SIZE: usize = 5000;

/// Cumulative percentage of `done` over `total`, rounded half up
pub fn progress_pct(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100 + total / 2) / total).min(100) as u8
}

/// Upsert `rows` in consecutive chunks of `batch_size`, one call at a time
/// and in order. `progress` gets the cumulative percentage after every
/// committed batch and ends on 100.
///
/// The first failing batch stops the run; batches committed before it stay
/// in the store. Cancellation is only honored between batches.
pub async fn upload_in_batches(
    store: &dyn ObservationStore,
    rows: &[Observation],
    batch_size: usize,
    progress: &mut (dyn FnMut(u8) + Send),
    cancel: &CancellationToken,
) -> Result<usize, IngestError> {
    let batch_size = batch_size.max(1);
    let total = rows.len();
    let mut uploaded = 0;

    for (i, batch) in rows.chunks(batch_size).enumerate() {
        if cancel.is_cancelled() {
            info!(uploaded, total, "upload cancelled between batches");
            return Err(IngestError::Cancelled { uploaded });
        }

        store
            .upsert_observations(batch)
            .await
            .map_err(|source| IngestError::Batch {
                batch: i + 1,
                uploaded,
                source,
            })?;

        uploaded += batch.len();
        debug!(batch = i + 1, size = batch.len(), uploaded, total, "batch committed");
        progress(progress_pct(uploaded, total));
    }

    if total == 0 {
        progress(100);
    }
    Ok(uploaded)
}
