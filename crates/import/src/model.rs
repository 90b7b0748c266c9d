use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use kassa_core::{CategoryTree, RawRecord};

use crate::miner::MinedPatterns;

/// Leaf lines included in the category-tree summary. Bounded for prompt
/// economy; a tree larger than this is truncated, not an error.
pub const MAX_TREE_LINES: usize = 50;
/// Mined patterns included in the prompt sample.
pub const MAX_PATTERN_LINES: usize = 20;
/// Per-call timeout for the external model. No retry is performed, so
/// worst-case batch latency is uncertain-record count times this value.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model fallback is disabled")]
    Disabled,
    #[error("Model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Model response malformed: {0}")]
    Malformed(String),
}

/// The narrow request contract for the external categorization model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub category_tree_summary: String,
    pub mined_pattern_sample: String,
    pub merchant: Option<String>,
    pub memo: Option<String>,
    pub amount: String,
    pub csv_labels: Vec<String>,
}

impl ModelRequest {
    pub fn for_record(
        tree: &CategoryTree,
        patterns: &MinedPatterns,
        record: &RawRecord,
    ) -> Self {
        ModelRequest {
            category_tree_summary: tree_summary(tree, MAX_TREE_LINES),
            mined_pattern_sample: pattern_sample(patterns, MAX_PATTERN_LINES),
            merchant: record.merchant.clone(),
            memo: record.memo.clone(),
            amount: record.amount.normalize().to_string(),
            csv_labels: [
                record.csv_main_category.as_deref(),
                record.csv_category.as_deref(),
                record.csv_subcategory.as_deref(),
            ]
            .into_iter()
            .flatten()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// One line per leaf category: `kind: Parent > Leaf`. Sorted so the same
/// tree always produces the same prompt.
fn tree_summary(tree: &CategoryTree, limit: usize) -> String {
    let parents: HashSet<_> = tree.iter().filter_map(|c| c.parent_id).collect();
    let mut lines: Vec<String> = tree
        .iter()
        .filter(|c| c.id.map_or(false, |id| !parents.contains(&id)))
        .filter_map(|c| {
            let path = tree.path(c.id?)?;
            Some(format!("{}: {}", c.kind, path))
        })
        .collect();
    lines.sort();
    lines.truncate(limit);
    lines.join("\n")
}

fn pattern_sample(patterns: &MinedPatterns, limit: usize) -> String {
    patterns
        .strongest(limit)
        .into_iter()
        .map(|(key, p)| format!("{key} -> {} ({:.2})", p.path, p.confidence))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelSuggestion {
    pub category_path: String,
    pub confidence: f64,
}

/// The external model, seen only through its request/response contract.
/// Implementations must bound their own latency; callers never retry.
pub trait ModelClient {
    fn suggest(
        &self,
        request: &ModelRequest,
    ) -> impl Future<Output = Result<ModelSuggestion, ModelError>> + Send;
}

/// HTTP JSON client for a model endpoint. One POST per uncertain record,
/// bounded by the client timeout.
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpModelClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpModelClient {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

impl ModelClient for HttpModelClient {
    async fn suggest(&self, request: &ModelRequest) -> Result<ModelSuggestion, ModelError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        let suggestion: ModelSuggestion = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        if suggestion.category_path.trim().is_empty() {
            return Err(ModelError::Malformed("empty category path".to_string()));
        }
        Ok(suggestion)
    }
}

/// Stands in when no model endpoint is configured. Every call degrades to
/// "no match" at the resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledModel;

impl ModelClient for DisabledModel {
    async fn suggest(&self, _request: &ModelRequest) -> Result<ModelSuggestion, ModelError> {
        Err(ModelError::Disabled)
    }
}
