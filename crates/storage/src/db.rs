use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use kassa_core::{
    BatchStatus, Category, CategoryId, CategoryKind, CategorySource, CategoryTree, ImportBatch,
    Transaction,
};

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Stored value could not be decoded: {0}")]
    Decode(String),
    #[error("Category {0} does not belong to user {1}")]
    InvalidCategory(i64, i64),
    #[error("{0}")]
    InvalidParent(#[from] kassa_core::CategoryError),
    #[error("Import batch {0} is not in processing state")]
    BatchNotProcessing(i64),
}

pub async fn create_db(path: &Path) -> Result<DbPool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            parent_id INTEGER,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            code TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (parent_id) REFERENCES categories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing',
            rows_total INTEGER NOT NULL DEFAULT 0,
            rows_imported INTEGER NOT NULL DEFAULT 0,
            rows_duplicated INTEGER NOT NULL DEFAULT 0,
            rows_errors INTEGER NOT NULL DEFAULT 0,
            summary TEXT,
            error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            posted_at TEXT NOT NULL,
            amount TEXT NOT NULL,
            currency TEXT NOT NULL,
            merchant TEXT,
            memo TEXT,
            category_id INTEGER,
            source_category TEXT,
            confidence REAL,
            review_needed INTEGER NOT NULL DEFAULT 0,
            import_batch_id INTEGER NOT NULL,
            dedupe_hash TEXT NOT NULL,
            transfer_pair_id TEXT,
            source_account TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (category_id) REFERENCES categories(id),
            FOREIGN KEY (import_batch_id) REFERENCES import_batches(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_dedupe ON transactions(user_id, dedupe_hash)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_posted ON transactions(user_id, posted_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            actor TEXT NOT NULL,
            entity TEXT NOT NULL,
            action TEXT NOT NULL,
            details TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── Categories ────────────────────────────────────────────────────────────

pub async fn insert_category(pool: &DbPool, category: &Category) -> Result<CategoryId, StoreError> {
    if let Some(parent) = category.parent_id {
        // Parent must exist and belong to the same user.
        let owned: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM categories WHERE id = ? AND user_id = ?")
                .bind(parent.0)
                .bind(category.user_id)
                .fetch_optional(pool)
                .await?;
        if owned.is_none() {
            return Err(StoreError::InvalidCategory(parent.0, category.user_id));
        }
    }

    let row: (i64,) = sqlx::query_as(
        "INSERT INTO categories (user_id, parent_id, name, kind, code) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(category.user_id)
    .bind(category.parent_id.map(|p| p.0))
    .bind(&category.name)
    .bind(category.kind.as_str())
    .bind(&category.code)
    .fetch_one(pool)
    .await?;

    Ok(CategoryId(row.0))
}

pub async fn get_categories(pool: &DbPool, user_id: i64) -> Result<Vec<Category>, StoreError> {
    let rows = sqlx::query_as::<_, (i64, i64, Option<i64>, String, String, String)>(
        "SELECT id, user_id, parent_id, name, kind, code FROM categories WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let kind = CategoryKind::from_str(&r.4).map_err(StoreError::Decode)?;
            Ok(Category {
                id: Some(CategoryId(r.0)),
                user_id: r.1,
                parent_id: r.2.map(CategoryId),
                name: r.3,
                kind,
                code: r.5,
            })
        })
        .collect()
}

/// Re-parent a category, enforcing acyclicity against the user's current
/// tree before touching the row.
pub async fn move_category(
    pool: &DbPool,
    user_id: i64,
    id: CategoryId,
    new_parent: Option<CategoryId>,
) -> Result<(), StoreError> {
    let tree = CategoryTree::from_categories(get_categories(pool, user_id).await?);
    if !tree.contains(id) {
        return Err(StoreError::InvalidCategory(id.0, user_id));
    }
    if let Some(parent) = new_parent {
        tree.validate_parent(id, parent)?;
    }

    sqlx::query("UPDATE categories SET parent_id = ? WHERE id = ? AND user_id = ?")
        .bind(new_parent.map(|p| p.0))
        .bind(id.0)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

// ── Transactions ──────────────────────────────────────────────────────────

type TransactionRow = (
    i64,            // id
    i64,            // user_id
    String,         // posted_at
    String,         // amount
    String,         // currency
    Option<String>, // merchant
    Option<String>, // memo
    Option<i64>,    // category_id
    Option<String>, // source_category
    Option<f64>,    // confidence
    i64,            // review_needed
    i64,            // import_batch_id
    String,         // dedupe_hash
    Option<String>, // transfer_pair_id
    Option<String>, // source_account
);

const TRANSACTION_COLUMNS: &str = "id, user_id, posted_at, amount, currency, merchant, memo, \
     category_id, source_category, confidence, review_needed, import_batch_id, dedupe_hash, \
     transfer_pair_id, source_account";

fn map_transaction(r: TransactionRow) -> Result<Transaction, StoreError> {
    let posted_at = NaiveDate::parse_from_str(&r.2, "%Y-%m-%d")
        .map_err(|e| StoreError::Decode(format!("posted_at '{}': {e}", r.2)))?;
    let amount = Decimal::from_str(&r.3)
        .map_err(|e| StoreError::Decode(format!("amount '{}': {e}", r.3)))?;
    let source_category = r
        .8
        .as_deref()
        .map(CategorySource::from_str)
        .transpose()
        .map_err(StoreError::Decode)?;

    Ok(Transaction {
        id: Some(r.0),
        user_id: r.1,
        posted_at,
        amount,
        currency: r.4,
        merchant: r.5,
        memo: r.6,
        category_id: r.7.map(CategoryId),
        source_category,
        confidence: r.9,
        review_needed: r.10 != 0,
        import_batch_id: r.11,
        dedupe_hash: r.12,
        transfer_pair_id: r.13,
        source_account: r.14,
    })
}

pub async fn insert_transaction(pool: &DbPool, tx: &Transaction) -> Result<i64, StoreError> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO transactions
            (user_id, posted_at, amount, currency, merchant, memo, category_id,
             source_category, confidence, review_needed, import_batch_id, dedupe_hash,
             transfer_pair_id, source_account)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(tx.user_id)
    .bind(tx.posted_at.format("%Y-%m-%d").to_string())
    .bind(tx.amount.normalize().to_string())
    .bind(&tx.currency)
    .bind(&tx.merchant)
    .bind(&tx.memo)
    .bind(tx.category_id.map(|c| c.0))
    .bind(tx.source_category.map(|s| s.as_str()))
    .bind(tx.confidence)
    .bind(i64::from(tx.review_needed))
    .bind(tx.import_batch_id)
    .bind(&tx.dedupe_hash)
    .bind(&tx.transfer_pair_id)
    .bind(&tx.source_account)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

pub async fn get_dedupe_hashes(pool: &DbPool, user_id: i64) -> Result<HashSet<String>, StoreError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT dedupe_hash FROM transactions WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// The pattern miner's training set: transactions categorized by the user,
/// or taken verbatim from the export labels. Fuzzy label guesses are also
/// stored as 'imported' but at a lower confidence, so `min_label_confidence`
/// fences them out — a guess must never train future guesses.
pub async fn get_confirmed_transactions(
    pool: &DbPool,
    user_id: i64,
    min_label_confidence: f64,
) -> Result<Vec<Transaction>, StoreError> {
    let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         WHERE user_id = ? AND category_id IS NOT NULL \
           AND (source_category = 'user' \
                OR (source_category = 'imported' AND confidence >= ?)) \
         ORDER BY id"
    ))
    .bind(user_id)
    .bind(min_label_confidence)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(map_transaction).collect()
}

/// Unpaired transactions posted on or after `cutoff` — the transfer
/// detector's candidate set.
pub async fn get_unpaired_since(
    pool: &DbPool,
    user_id: i64,
    cutoff: NaiveDate,
) -> Result<Vec<Transaction>, StoreError> {
    let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         WHERE user_id = ? AND transfer_pair_id IS NULL AND posted_at >= ? \
         ORDER BY id"
    ))
    .bind(user_id)
    .bind(cutoff.format("%Y-%m-%d").to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(map_transaction).collect()
}

pub async fn get_transaction(pool: &DbPool, id: i64) -> Result<Option<Transaction>, StoreError> {
    let row: Option<TransactionRow> = sqlx::query_as(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(map_transaction).transpose()
}

/// Link both legs of an accepted transfer pair and re-categorize them.
pub async fn apply_transfer_pair(
    pool: &DbPool,
    user_id: i64,
    outgoing_id: i64,
    incoming_id: i64,
    pair_id: &str,
    transfers_category: CategoryId,
    confidence: f64,
) -> Result<(), StoreError> {
    for tx_id in [outgoing_id, incoming_id] {
        sqlx::query(
            "UPDATE transactions SET transfer_pair_id = ?, category_id = ?, \
             source_category = 'rule', confidence = ?, review_needed = 0 \
             WHERE id = ? AND user_id = ?",
        )
        .bind(pair_id)
        .bind(transfers_category.0)
        .bind(confidence.clamp(0.0, 1.0))
        .bind(tx_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

// ── Manual & bulk categorization ──────────────────────────────────────────

async fn require_owned_category(
    pool: &DbPool,
    user_id: i64,
    category_id: CategoryId,
) -> Result<(), StoreError> {
    let owned: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM categories WHERE id = ? AND user_id = ?")
            .bind(category_id.0)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    if owned.is_none() {
        return Err(StoreError::InvalidCategory(category_id.0, user_id));
    }
    Ok(())
}

/// Manually assign a category to one transaction. A category id outside
/// the user's tree is rejected, not silently ignored.
pub async fn assign_category(
    pool: &DbPool,
    user_id: i64,
    transaction_id: i64,
    category_id: CategoryId,
) -> Result<(), StoreError> {
    require_owned_category(pool, user_id, category_id).await?;

    sqlx::query(
        "UPDATE transactions SET category_id = ?, source_category = 'user', \
         confidence = 1.0, review_needed = 0 WHERE id = ? AND user_id = ?",
    )
    .bind(category_id.0)
    .bind(transaction_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    insert_audit_entry(
        pool,
        &format!("user:{user_id}"),
        "transaction",
        "categorize",
        Some(&format!(
            "{{\"transaction_id\":{transaction_id},\"category_id\":{}}}",
            category_id.0
        )),
    )
    .await?;

    Ok(())
}

/// Assign one category to many transactions at once. Returns the number
/// of rows actually updated.
pub async fn bulk_assign_category(
    pool: &DbPool,
    user_id: i64,
    transaction_ids: &[i64],
    category_id: CategoryId,
) -> Result<u64, StoreError> {
    require_owned_category(pool, user_id, category_id).await?;

    let mut updated = 0u64;
    for tx_id in transaction_ids {
        let result = sqlx::query(
            "UPDATE transactions SET category_id = ?, source_category = 'user', \
             confidence = 1.0, review_needed = 0 WHERE id = ? AND user_id = ?",
        )
        .bind(category_id.0)
        .bind(tx_id)
        .bind(user_id)
        .execute(pool)
        .await?;
        updated += result.rows_affected();
    }

    insert_audit_entry(
        pool,
        &format!("user:{user_id}"),
        "transaction",
        "bulk_categorize",
        Some(&format!(
            "{{\"count\":{updated},\"category_id\":{}}}",
            category_id.0
        )),
    )
    .await?;

    Ok(updated)
}

// ── Import batches ────────────────────────────────────────────────────────

pub async fn create_import_batch(pool: &DbPool, user_id: i64) -> Result<i64, StoreError> {
    let row: (i64,) =
        sqlx::query_as("INSERT INTO import_batches (user_id, status) VALUES (?, 'processing') RETURNING id")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

pub async fn complete_import_batch(
    pool: &DbPool,
    batch_id: i64,
    rows_total: u32,
    rows_imported: u32,
    rows_duplicated: u32,
    rows_errors: u32,
    summary_json: &str,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE import_batches SET status = 'completed', rows_total = ?, rows_imported = ?, \
         rows_duplicated = ?, rows_errors = ?, summary = ? \
         WHERE id = ? AND status = 'processing'",
    )
    .bind(rows_total)
    .bind(rows_imported)
    .bind(rows_duplicated)
    .bind(rows_errors)
    .bind(summary_json)
    .bind(batch_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::BatchNotProcessing(batch_id));
    }
    Ok(())
}

/// Mark a batch failed. Transactions already written under it stay put;
/// the batch is best-effort, not atomic.
pub async fn fail_import_batch(
    pool: &DbPool,
    batch_id: i64,
    error: &str,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE import_batches SET status = 'failed', error = ? \
         WHERE id = ? AND status = 'processing'",
    )
    .bind(error)
    .bind(batch_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::BatchNotProcessing(batch_id));
    }
    Ok(())
}

pub async fn get_import_batch(
    pool: &DbPool,
    batch_id: i64,
) -> Result<Option<ImportBatch>, StoreError> {
    let row: Option<(i64, i64, String, i64, i64, i64, i64, Option<String>, Option<String>)> =
        sqlx::query_as(
            "SELECT id, user_id, status, rows_total, rows_imported, rows_duplicated, \
             rows_errors, summary, error FROM import_batches WHERE id = ?",
        )
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| {
        let status = BatchStatus::from_str(&r.2).map_err(StoreError::Decode)?;
        Ok(ImportBatch {
            id: Some(r.0),
            user_id: r.1,
            status,
            rows_total: r.3 as u32,
            rows_imported: r.4 as u32,
            rows_duplicated: r.5 as u32,
            rows_errors: r.6 as u32,
            summary: r.7,
            error: r.8,
        })
    })
    .transpose()
}

// ── Audit log ─────────────────────────────────────────────────────────────

pub async fn insert_audit_entry(
    pool: &DbPool,
    actor: &str,
    entity: &str,
    action: &str,
    details: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO audit_log (actor, entity, action, details) VALUES (?, ?, ?, ?)")
        .bind(actor)
        .bind(entity)
        .bind(action)
        .bind(details)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_audit_entries(pool: &DbPool, entity: &str) -> Result<i64, StoreError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log WHERE entity = ?")
        .bind(entity)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassa_core::CategoryKind;

    async fn test_db() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("kassa.db")).await.unwrap();
        (dir, pool)
    }

    fn category(user_id: i64, name: &str, kind: CategoryKind) -> Category {
        Category::new(user_id, name, kind, &name.to_lowercase().replace(' ', "-"))
    }

    fn transaction(user_id: i64, batch_id: i64, amount: &str, hash: &str) -> Transaction {
        Transaction {
            id: None,
            user_id,
            posted_at: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            amount: Decimal::from_str(amount).unwrap(),
            currency: "EUR".to_string(),
            merchant: Some("Test Shop".to_string()),
            memo: None,
            category_id: None,
            source_category: None,
            confidence: None,
            review_needed: true,
            import_batch_id: batch_id,
            dedupe_hash: hash.to_string(),
            transfer_pair_id: None,
            source_account: None,
        }
    }

    #[tokio::test]
    async fn transaction_roundtrip_preserves_decimal_amount() {
        let (_dir, pool) = test_db().await;
        let batch = create_import_batch(&pool, 1).await.unwrap();
        let id = insert_transaction(&pool, &transaction(1, batch, "-1234.56", "h1"))
            .await
            .unwrap();

        let loaded = get_transaction(&pool, id).await.unwrap().unwrap();
        assert_eq!(loaded.amount, Decimal::from_str("-1234.56").unwrap());
        assert_eq!(loaded.posted_at, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert!(loaded.review_needed);
        assert!(loaded.review_invariant_holds());
    }

    #[tokio::test]
    async fn dedupe_hashes_are_per_user() {
        let (_dir, pool) = test_db().await;
        let batch = create_import_batch(&pool, 1).await.unwrap();
        insert_transaction(&pool, &transaction(1, batch, "-1.00", "aaa"))
            .await
            .unwrap();
        insert_transaction(&pool, &transaction(1, batch, "-2.00", "bbb"))
            .await
            .unwrap();

        let hashes = get_dedupe_hashes(&pool, 1).await.unwrap();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains("aaa"));
        assert!(get_dedupe_hashes(&pool, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn assign_category_rejects_foreign_category() {
        let (_dir, pool) = test_db().await;
        let other_users_category =
            insert_category(&pool, &category(2, "Groceries", CategoryKind::Expense))
                .await
                .unwrap();
        let batch = create_import_batch(&pool, 1).await.unwrap();
        let tx = insert_transaction(&pool, &transaction(1, batch, "-3.00", "ccc"))
            .await
            .unwrap();

        let result = assign_category(&pool, 1, tx, other_users_category).await;
        assert!(matches!(result, Err(StoreError::InvalidCategory(_, 1))));

        // The transaction is untouched.
        let loaded = get_transaction(&pool, tx).await.unwrap().unwrap();
        assert!(loaded.category_id.is_none());
    }

    #[tokio::test]
    async fn assign_category_marks_user_source_and_audits() {
        let (_dir, pool) = test_db().await;
        let cat_id = insert_category(&pool, &category(1, "Groceries", CategoryKind::Expense))
            .await
            .unwrap();
        let batch = create_import_batch(&pool, 1).await.unwrap();
        let tx = insert_transaction(&pool, &transaction(1, batch, "-3.00", "ddd"))
            .await
            .unwrap();

        assign_category(&pool, 1, tx, cat_id).await.unwrap();

        let loaded = get_transaction(&pool, tx).await.unwrap().unwrap();
        assert_eq!(loaded.category_id, Some(cat_id));
        assert_eq!(loaded.source_category, Some(CategorySource::User));
        assert!(!loaded.review_needed);
        assert!(loaded.review_invariant_holds());
        assert_eq!(count_audit_entries(&pool, "transaction").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bulk_assign_updates_only_owned_rows() {
        let (_dir, pool) = test_db().await;
        let cat_id = insert_category(&pool, &category(1, "Groceries", CategoryKind::Expense))
            .await
            .unwrap();
        let batch = create_import_batch(&pool, 1).await.unwrap();
        let mine = insert_transaction(&pool, &transaction(1, batch, "-3.00", "e1"))
            .await
            .unwrap();
        let other_batch = create_import_batch(&pool, 2).await.unwrap();
        let theirs = insert_transaction(&pool, &transaction(2, other_batch, "-3.00", "e2"))
            .await
            .unwrap();

        let updated = bulk_assign_category(&pool, 1, &[mine, theirs], cat_id)
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let untouched = get_transaction(&pool, theirs).await.unwrap().unwrap();
        assert!(untouched.category_id.is_none());
    }

    #[tokio::test]
    async fn batch_completes_exactly_once() {
        let (_dir, pool) = test_db().await;
        let batch = create_import_batch(&pool, 1).await.unwrap();

        complete_import_batch(&pool, batch, 3, 2, 1, 0, "{}")
            .await
            .unwrap();
        let loaded = get_import_batch(&pool, batch).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Completed);
        assert_eq!(loaded.rows_total, 3);

        // Terminal states are immutable.
        assert!(matches!(
            complete_import_batch(&pool, batch, 3, 2, 1, 0, "{}").await,
            Err(StoreError::BatchNotProcessing(_))
        ));
        assert!(matches!(
            fail_import_batch(&pool, batch, "late failure").await,
            Err(StoreError::BatchNotProcessing(_))
        ));
    }

    #[tokio::test]
    async fn failed_batch_keeps_error_message() {
        let (_dir, pool) = test_db().await;
        let batch = create_import_batch(&pool, 1).await.unwrap();
        fail_import_batch(&pool, batch, "storage unavailable")
            .await
            .unwrap();

        let loaded = get_import_batch(&pool, batch).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("storage unavailable"));
    }

    #[tokio::test]
    async fn confirmed_transactions_exclude_guesses() {
        let (_dir, pool) = test_db().await;
        let cat_id = insert_category(&pool, &category(1, "Groceries", CategoryKind::Expense))
            .await
            .unwrap();
        let batch = create_import_batch(&pool, 1).await.unwrap();

        let mut confirmed = transaction(1, batch, "-5.00", "f1");
        confirmed.category_id = Some(cat_id);
        confirmed.source_category = Some(CategorySource::User);
        confirmed.review_needed = false;
        insert_transaction(&pool, &confirmed).await.unwrap();

        let mut exact = transaction(1, batch, "-7.00", "f3");
        exact.category_id = Some(cat_id);
        exact.source_category = Some(CategorySource::Imported);
        exact.confidence = Some(0.95);
        exact.review_needed = false;
        insert_transaction(&pool, &exact).await.unwrap();

        let mut guessed = transaction(1, batch, "-6.00", "f2");
        guessed.category_id = Some(cat_id);
        guessed.source_category = Some(CategorySource::Mined);
        guessed.review_needed = false;
        insert_transaction(&pool, &guessed).await.unwrap();

        // Stored as 'imported' like an exact hit, but at fuzzy confidence.
        let mut fuzzy = transaction(1, batch, "-8.00", "f4");
        fuzzy.category_id = Some(cat_id);
        fuzzy.source_category = Some(CategorySource::Imported);
        fuzzy.confidence = Some(0.70);
        fuzzy.review_needed = false;
        insert_transaction(&pool, &fuzzy).await.unwrap();

        let training = get_confirmed_transactions(&pool, 1, 0.95).await.unwrap();
        assert_eq!(training.len(), 2);
        assert_eq!(training[0].source_category, Some(CategorySource::User));
        assert_eq!(training[1].source_category, Some(CategorySource::Imported));
        assert_eq!(training[1].confidence, Some(0.95));
    }

    #[tokio::test]
    async fn transfer_pair_links_and_recategorizes_both_legs() {
        let (_dir, pool) = test_db().await;
        let transfers = insert_category(&pool, &category(1, "Transfers", CategoryKind::Transfer))
            .await
            .unwrap();
        let batch = create_import_batch(&pool, 1).await.unwrap();
        let out_leg = insert_transaction(&pool, &transaction(1, batch, "-50.00", "g1"))
            .await
            .unwrap();
        let in_leg = insert_transaction(&pool, &transaction(1, batch, "50.00", "g2"))
            .await
            .unwrap();

        apply_transfer_pair(&pool, 1, out_leg, in_leg, "pair-1", transfers, 0.9)
            .await
            .unwrap();

        for id in [out_leg, in_leg] {
            let leg = get_transaction(&pool, id).await.unwrap().unwrap();
            assert_eq!(leg.transfer_pair_id.as_deref(), Some("pair-1"));
            assert_eq!(leg.category_id, Some(transfers));
            assert_eq!(leg.source_category, Some(CategorySource::Rule));
            assert_eq!(leg.confidence, Some(0.9));
            assert!(!leg.review_needed);
        }

        // Paired legs drop out of the candidate query.
        let unpaired = get_unpaired_since(
            &pool,
            1,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
        .await
        .unwrap();
        assert!(unpaired.is_empty());
    }

    #[tokio::test]
    async fn move_category_rejects_cycles() {
        let (_dir, pool) = test_db().await;
        let food = insert_category(&pool, &category(1, "Food", CategoryKind::Expense))
            .await
            .unwrap();
        let groceries = insert_category(
            &pool,
            &category(1, "Groceries", CategoryKind::Expense).child_of(food),
        )
        .await
        .unwrap();

        assert!(matches!(
            move_category(&pool, 1, food, Some(groceries)).await,
            Err(StoreError::InvalidParent(_))
        ));
        // A legal move still works.
        move_category(&pool, 1, groceries, None).await.unwrap();
    }
}
