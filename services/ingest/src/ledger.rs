//! Upload ledger entries: one audit record per submitted file.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of an upload record. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Processing,
    Done,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Processing => "processing",
            UploadStatus::Done => "done",
            UploadStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Processing)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(UploadStatus::Processing),
            "done" => Ok(UploadStatus::Done),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(format!("unknown upload status '{}'", other)),
        }
    }
}

impl TryFrom<String> for UploadStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Fields known when a run starts
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub user_id: String,
    pub filename: String,
}

/// Partial update; `None` leaves the stored column untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadUpdate {
    pub status: Option<UploadStatus>,
    pub total_rows: Option<i32>,
    pub valid_rows: Option<i32>,
    pub invalid_rows: Option<i32>,
    pub error: Option<String>,
}

impl UploadUpdate {
    pub fn counts(total: usize, valid: usize, invalid: usize) -> Self {
        Self {
            total_rows: Some(count_to_i32(total)),
            valid_rows: Some(count_to_i32(valid)),
            invalid_rows: Some(count_to_i32(invalid)),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            status: Some(UploadStatus::Done),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(UploadStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

fn count_to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Stored upload record (`uploads`)
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct UploadRecord {
    pub id: Uuid,
    pub user_id: String,
    pub filename: String,
    #[sqlx(try_from = "String")]
    pub status: UploadStatus,
    pub total_rows: i32,
    pub valid_rows: i32,
    pub invalid_rows: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadRecord {
    /// Fresh record in `processing` state
    pub fn start(id: Uuid, new: &NewUpload) -> Self {
        Self {
            id,
            user_id: new.user_id.clone(),
            filename: new.filename.clone(),
            status: UploadStatus::Processing,
            total_rows: 0,
            valid_rows: 0,
            invalid_rows: 0,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Apply a partial update the same way the SQL `COALESCE` update does
    pub fn apply(&mut self, update: &UploadUpdate) {
        if let Some(status) = update.status {
            self.status = status;
            if status.is_terminal() {
                self.finished_at = Some(Utc::now());
            }
        }
        if let Some(n) = update.total_rows {
            self.total_rows = n;
        }
        if let Some(n) = update.valid_rows {
            self.valid_rows = n;
        }
        if let Some(n) = update.invalid_rows {
            self.invalid_rows = n;
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }
    }
}
