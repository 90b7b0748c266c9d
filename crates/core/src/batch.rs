use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::transaction::MatchMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    /// Batches leave `processing` exactly once and never come back.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Processing, BatchStatus::Completed)
                | (BatchStatus::Processing, BatchStatus::Failed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(format!("Unknown batch status: '{other}'")),
        }
    }
}

/// Aggregate result of one import batch, as handed to the surrounding
/// CRUD layer and stored on the batch row as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub rows_total: u32,
    pub rows_imported: u32,
    pub rows_duplicated: u32,
    /// Zero on every completed batch: per-record soft failures (no match,
    /// model unavailable) are counted under "none" in `categorization`,
    /// and a storage failure fails the whole batch instead of
    /// incrementing this.
    pub rows_errors: u32,
    /// Counts per resolution method ("exact", "fuzzy", "mined", "model", "none").
    pub categorization: BTreeMap<String, u32>,
    pub status: BatchStatus,
}

impl ImportSummary {
    pub fn new() -> Self {
        ImportSummary {
            rows_total: 0,
            rows_imported: 0,
            rows_duplicated: 0,
            rows_errors: 0,
            categorization: BTreeMap::new(),
            status: BatchStatus::Processing,
        }
    }

    pub fn count_method(&mut self, method: MatchMethod) {
        *self
            .categorization
            .entry(method.as_str().to_string())
            .or_insert(0) += 1;
    }
}

impl Default for ImportSummary {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: Option<i64>,
    pub user_id: i64,
    pub status: BatchStatus,
    pub rows_total: u32,
    pub rows_imported: u32,
    pub rows_duplicated: u32,
    pub rows_errors: u32,
    /// JSON-encoded [`ImportSummary`], set on completion.
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl ImportBatch {
    pub fn started(user_id: i64) -> Self {
        ImportBatch {
            id: None,
            user_id,
            status: BatchStatus::Processing,
            rows_total: 0,
            rows_imported: 0,
            rows_duplicated: 0,
            rows_errors: 0,
            summary: None,
            error: None,
        }
    }
}
