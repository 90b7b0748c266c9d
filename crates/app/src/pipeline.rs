use chrono::{Duration, NaiveDate};
use thiserror::Error;
use tracing::{info, warn};

use kassa_core::{BatchStatus, CategoryTree, ImportSummary, RawRecord, Transaction};
use kassa_import::dedupe;
use kassa_import::miner::{mine, MinerConfig};
use kassa_import::model::ModelClient;
use kassa_import::resolver::{CategoryResolver, EXACT_CONFIDENCE};
use kassa_import::transfer::{TransferCandidate, TransferPairDetector};
use kassa_storage as storage;
use kassa_storage::{DbPool, StoreError};

use crate::jobs::JobTracker;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("Summary encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub batch_id: i64,
    pub summary: ImportSummary,
}

/// Drives one uploaded file end to end: batch creation, dedupe, the
/// categorization cascade, persistence, transfer pairing and batch
/// finalization. Record order is preserved throughout; dedupe and
/// greedy pairing both depend on it.
pub struct ImportPipeline<M> {
    db: DbPool,
    model: Option<M>,
    miner_config: MinerConfig,
    detector: TransferPairDetector,
}

impl<M: ModelClient> ImportPipeline<M> {
    pub fn new(db: DbPool, model: Option<M>) -> Self {
        ImportPipeline {
            db,
            model,
            miner_config: MinerConfig::default(),
            detector: TransferPairDetector::default(),
        }
    }

    pub fn with_detector(mut self, detector: TransferPairDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Import one file's worth of normalized records for a user.
    ///
    /// Soft failures (no category match, model unavailable) are absorbed
    /// into the summary. Storage failures abort the rest of the batch:
    /// the batch row is marked failed with a message, and rows already
    /// written stay written.
    pub async fn run(
        &self,
        user_id: i64,
        records: Vec<RawRecord>,
        jobs: &JobTracker,
    ) -> Result<ImportOutcome, PipelineError> {
        let batch_id = storage::create_import_batch(&self.db, user_id).await?;
        jobs.start(batch_id, records.len() as u32);
        info!(batch_id, rows = records.len(), "import batch started");

        match self.process(user_id, batch_id, records, jobs).await {
            Ok(summary) => {
                jobs.finish(batch_id);
                Ok(ImportOutcome { batch_id, summary })
            }
            Err(e) => {
                if let Err(mark) =
                    storage::fail_import_batch(&self.db, batch_id, &e.to_string()).await
                {
                    warn!(batch_id, "could not mark batch as failed: {mark}");
                }
                jobs.fail(batch_id, &e.to_string());
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        user_id: i64,
        batch_id: i64,
        records: Vec<RawRecord>,
        jobs: &JobTracker,
    ) -> Result<ImportSummary, PipelineError> {
        // One consistent read view for the whole batch: categories and
        // training history are snapshotted here and never re-read.
        let tree =
            CategoryTree::from_categories(storage::get_categories(&self.db, user_id).await?);
        let known_hashes = storage::get_dedupe_hashes(&self.db, user_id).await?;
        let confirmed =
            storage::get_confirmed_transactions(&self.db, user_id, EXACT_CONFIDENCE).await?;
        let patterns = mine(&confirmed, &tree, &self.miner_config);

        let mut summary = ImportSummary::new();
        summary.rows_total = records.len() as u32;

        let deduped = dedupe::filter_new(records, &known_hashes);
        summary.rows_duplicated = deduped.duplicates;

        let resolver = CategoryResolver::new(
            &tree,
            &patterns,
            self.miner_config.min_token_len,
            self.model.as_ref(),
        );

        let mut processed = summary.rows_duplicated;
        let mut newest_posted: Option<NaiveDate> = None;
        for (record, hash) in deduped.fresh {
            let resolution = resolver.resolve(&record).await;
            summary.count_method(resolution.method);

            let tx = Transaction::from_record(&record, user_id, batch_id, hash, &resolution);
            storage::insert_transaction(&self.db, &tx).await?;
            summary.rows_imported += 1;
            processed += 1;
            jobs.progress(batch_id, processed);
            newest_posted = newest_posted.max(Some(record.posted_at));
        }

        self.pair_transfers(user_id, &tree, newest_posted).await?;

        summary.status = BatchStatus::Completed;
        let summary_json = serde_json::to_string(&summary)?;
        storage::complete_import_batch(
            &self.db,
            batch_id,
            summary.rows_total,
            summary.rows_imported,
            summary.rows_duplicated,
            summary.rows_errors,
            &summary_json,
        )
        .await?;
        storage::insert_audit_entry(
            &self.db,
            &format!("user:{user_id}"),
            "import",
            "import_batch",
            Some(&summary_json),
        )
        .await?;

        info!(
            batch_id,
            imported = summary.rows_imported,
            duplicated = summary.rows_duplicated,
            "import batch completed"
        );
        Ok(summary)
    }

    /// Run pair detection over the batch's transactions plus unpaired
    /// history. The trailing window is anchored at the newest posted date
    /// in the batch, so historical re-imports pair consistently.
    async fn pair_transfers(
        &self,
        user_id: i64,
        tree: &CategoryTree,
        newest_posted: Option<NaiveDate>,
    ) -> Result<(), PipelineError> {
        let Some(newest) = newest_posted else {
            return Ok(());
        };
        let Some(transfers_id) = tree.transfers_category().and_then(|c| c.id) else {
            warn!("user has no transfer category; skipping pair detection");
            return Ok(());
        };

        let cutoff = newest - Duration::days(self.detector.config().window_days);
        let unpaired = storage::get_unpaired_since(&self.db, user_id, cutoff).await?;
        let candidates: Vec<TransferCandidate> = unpaired
            .iter()
            .filter_map(|tx| {
                let text = match (tx.merchant.as_deref(), tx.memo.as_deref()) {
                    (Some(m), Some(memo)) => Some(format!("{m} {memo}")),
                    (Some(m), None) => Some(m.to_string()),
                    (None, Some(memo)) => Some(memo.to_string()),
                    (None, None) => None,
                };
                Some(TransferCandidate {
                    id: tx.id?,
                    posted_at: tx.posted_at,
                    amount: tx.amount,
                    account: tx.source_account.clone(),
                    text,
                })
            })
            .collect();

        let pairs = self.detector.detect(&candidates);
        let confidence = self.detector.config().confidence;
        for pair in &pairs {
            storage::apply_transfer_pair(
                &self.db,
                user_id,
                pair.outgoing_id,
                pair.incoming_id,
                &pair.pair_id,
                transfers_id,
                confidence,
            )
            .await?;
        }
        if !pairs.is_empty() {
            info!(count = pairs.len(), "linked transfer pairs");
        }
        Ok(())
    }
}
