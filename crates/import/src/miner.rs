use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use kassa_core::{CategoryId, CategorySource, CategoryTree, Transaction};

#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Minimum occurrences before a merchant pattern is considered.
    pub min_merchant_count: u32,
    /// Minimum occurrences before a keyword pattern is considered.
    pub min_keyword_count: u32,
    /// Minimum share the dominant category must hold of a pattern's total.
    pub min_confidence: f64,
    /// Memo tokens shorter than this never become keyword patterns.
    pub min_token_len: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            min_merchant_count: 1,
            min_keyword_count: 2,
            min_confidence: 0.7,
            min_token_len: 4,
        }
    }
}

/// A strong mapping from a pattern key to its dominant category path.
#[derive(Debug, Clone, PartialEq)]
pub struct MinedPattern {
    pub category_id: CategoryId,
    pub path: String,
    /// Dominant category's share of this pattern's occurrences, in (0,1].
    pub confidence: f64,
    pub support: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MinedPatterns {
    pub merchants: HashMap<String, MinedPattern>,
    pub keywords: HashMap<String, MinedPattern>,
}

impl MinedPatterns {
    pub fn is_empty(&self) -> bool {
        self.merchants.is_empty() && self.keywords.is_empty()
    }

    /// Strongest patterns first, for the model-fallback prompt sample.
    /// Ordering is (confidence, support) descending, then key, so the
    /// sample is deterministic.
    pub fn strongest(&self, limit: usize) -> Vec<(&str, &MinedPattern)> {
        let mut all: Vec<(&str, &MinedPattern)> = self
            .merchants
            .iter()
            .chain(self.keywords.iter())
            .map(|(k, p)| (k.as_str(), p))
            .collect();
        all.sort_by(|a, b| {
            b.1.confidence
                .total_cmp(&a.1.confidence)
                .then(b.1.support.cmp(&a.1.support))
                .then(a.0.cmp(b.0))
        });
        all.truncate(limit);
        all
    }
}

/// Lower-cased alphanumeric tokens of `text`, at least `min_len` chars.
pub(crate) fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    // Unicode-aware split so Finnish/Swedish memo text tokenizes cleanly.
    // Compiled once; tokenize runs per memo per batch.
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    let splitter =
        SPLITTER.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("static token pattern"));
    splitter
        .split(&text.to_lowercase())
        .filter(|t| t.chars().count() >= min_len)
        .map(|t| t.to_string())
        .collect()
}

/// Derive merchant and keyword patterns from previously confirmed
/// transactions. Pure function of its input; nothing is mutated.
///
/// Confirmed means the category came straight from the export's own labels
/// or from the user, never from an earlier mined or model guess — mining
/// from mined output would let low-quality guesses reinforce themselves.
pub fn mine(
    confirmed: &[Transaction],
    tree: &CategoryTree,
    config: &MinerConfig,
) -> MinedPatterns {
    let mut merchant_counts: HashMap<String, HashMap<CategoryId, u32>> = HashMap::new();
    let mut keyword_counts: HashMap<String, HashMap<CategoryId, u32>> = HashMap::new();

    for tx in confirmed {
        let category_id = match (tx.source_category, tx.category_id) {
            (Some(CategorySource::Imported) | Some(CategorySource::User), Some(id)) => id,
            _ => continue,
        };

        if let Some(merchant) = tx.merchant.as_deref() {
            let key = merchant.trim().to_lowercase();
            if !key.is_empty() {
                *merchant_counts
                    .entry(key)
                    .or_default()
                    .entry(category_id)
                    .or_insert(0) += 1;
            }
        }

        if let Some(memo) = tx.memo.as_deref() {
            // Each distinct token counts once per transaction.
            let tokens: HashSet<String> =
                tokenize(memo, config.min_token_len).into_iter().collect();
            for token in tokens {
                *keyword_counts
                    .entry(token)
                    .or_default()
                    .entry(category_id)
                    .or_insert(0) += 1;
            }
        }
    }

    MinedPatterns {
        merchants: extract_strong(merchant_counts, tree, config.min_merchant_count, config),
        keywords: extract_strong(keyword_counts, tree, config.min_keyword_count, config),
    }
}

fn extract_strong(
    counts: HashMap<String, HashMap<CategoryId, u32>>,
    tree: &CategoryTree,
    min_count: u32,
    config: &MinerConfig,
) -> HashMap<String, MinedPattern> {
    let mut strong = HashMap::new();

    for (key, per_category) in counts {
        let total: u32 = per_category.values().sum();
        if total < min_count {
            continue;
        }
        // Dominant category; equal shares resolve to the smallest id so
        // repeated mining runs agree.
        let Some((&dominant_id, &dominant_count)) = per_category
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        else {
            continue;
        };
        let confidence = f64::from(dominant_count) / f64::from(total);
        if confidence < config.min_confidence {
            continue;
        }
        let Some(path) = tree.path(dominant_id) else {
            // Category vanished between snapshot and mining; skip the key.
            continue;
        };
        strong.insert(
            key,
            MinedPattern {
                category_id: dominant_id,
                path,
                confidence,
                support: total,
            },
        );
    }

    strong
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kassa_core::{Category, CategoryKind};
    use rust_decimal::Decimal;

    fn tree() -> CategoryTree {
        let cat = |id: i64, name: &str| Category {
            id: Some(CategoryId(id)),
            user_id: 1,
            parent_id: None,
            name: name.to_string(),
            kind: CategoryKind::Expense,
            code: name.to_lowercase(),
        };
        CategoryTree::from_categories(vec![
            cat(1, "Groceries"),
            cat(2, "Restaurants"),
            cat(3, "Utilities"),
        ])
    }

    fn confirmed(merchant: Option<&str>, memo: Option<&str>, category: i64) -> Transaction {
        Transaction {
            id: None,
            user_id: 1,
            posted_at: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            amount: Decimal::new(-1250, 2),
            currency: "EUR".to_string(),
            merchant: merchant.map(|s| s.to_string()),
            memo: memo.map(|s| s.to_string()),
            category_id: Some(CategoryId(category)),
            source_category: Some(CategorySource::User),
            confidence: Some(1.0),
            review_needed: false,
            import_batch_id: 1,
            dedupe_hash: String::new(),
            transfer_pair_id: None,
            source_account: None,
        }
    }

    #[test]
    fn dominant_merchant_above_threshold_is_extracted() {
        // 9 of 10 "Foo" transactions map to Groceries.
        let mut txs: Vec<Transaction> =
            (0..9).map(|_| confirmed(Some("Foo"), None, 1)).collect();
        txs.push(confirmed(Some("Foo"), None, 2));

        let mined = mine(&txs, &tree(), &MinerConfig::default());
        let pattern = mined.merchants.get("foo").unwrap();
        assert_eq!(pattern.category_id, CategoryId(1));
        assert_eq!(pattern.path, "Groceries");
        assert!((pattern.confidence - 0.9).abs() < 1e-9);
        assert_eq!(pattern.support, 10);
    }

    #[test]
    fn split_below_confidence_threshold_is_dropped() {
        // 6 of 10 is a 0.6 share, under the 0.7 floor — no pattern at all.
        let mut txs: Vec<Transaction> =
            (0..6).map(|_| confirmed(Some("Foo"), None, 1)).collect();
        txs.extend((0..4).map(|_| confirmed(Some("Foo"), None, 2)));

        let mined = mine(&txs, &tree(), &MinerConfig::default());
        assert!(mined.merchants.is_empty());
    }

    #[test]
    fn single_merchant_occurrence_is_enough() {
        let txs = vec![confirmed(Some("Helen Oy"), None, 3)];
        let mined = mine(&txs, &tree(), &MinerConfig::default());
        assert_eq!(
            mined.merchants.get("helen oy").unwrap().category_id,
            CategoryId(3)
        );
    }

    #[test]
    fn keyword_needs_two_occurrences() {
        let once = vec![confirmed(None, Some("electricity bill march"), 3)];
        let mined = mine(&once, &tree(), &MinerConfig::default());
        assert!(mined.keywords.is_empty());

        let twice = vec![
            confirmed(None, Some("electricity bill march"), 3),
            confirmed(None, Some("electricity bill april"), 3),
        ];
        let mined = mine(&twice, &tree(), &MinerConfig::default());
        let pattern = mined.keywords.get("electricity").unwrap();
        assert_eq!(pattern.category_id, CategoryId(3));
        assert_eq!(pattern.support, 2);
        // "bill" also repeats and is exactly 4 chars.
        assert!(mined.keywords.contains_key("bill"));
    }

    #[test]
    fn short_tokens_are_ignored() {
        let txs = vec![
            confirmed(None, Some("gas osk bar"), 2),
            confirmed(None, Some("gas osk bar"), 2),
        ];
        let mined = mine(&txs, &tree(), &MinerConfig::default());
        assert!(mined.keywords.is_empty());
    }

    #[test]
    fn mined_and_model_sources_are_not_training_data() {
        let mut tx = confirmed(Some("Foo"), None, 1);
        tx.source_category = Some(CategorySource::Mined);
        let mined = mine(&[tx], &tree(), &MinerConfig::default());
        assert!(mined.merchants.is_empty());
    }

    #[test]
    fn equal_split_resolves_to_smallest_category_id() {
        let txs = vec![
            confirmed(Some("Foo"), None, 2),
            confirmed(Some("Foo"), None, 2),
            confirmed(Some("Foo"), None, 1),
            confirmed(Some("Foo"), None, 1),
        ];
        let mined = mine(
            &txs,
            &tree(),
            &MinerConfig {
                min_confidence: 0.5,
                ..MinerConfig::default()
            },
        );
        assert_eq!(mined.merchants.get("foo").unwrap().category_id, CategoryId(1));
    }

    #[test]
    fn strongest_orders_by_confidence_then_support() {
        let mut txs: Vec<Transaction> =
            (0..4).map(|_| confirmed(Some("Alpha"), None, 1)).collect();
        txs.push(confirmed(Some("Alpha"), None, 2)); // 0.8 conf, support 5
        txs.push(confirmed(Some("Beta"), None, 2)); // 1.0 conf, support 1

        let mined = mine(&txs, &tree(), &MinerConfig::default());
        let ranked = mined.strongest(10);
        assert_eq!(ranked[0].0, "beta");
        assert_eq!(ranked[1].0, "alpha");

        assert_eq!(mined.strongest(1).len(), 1);
    }

    #[test]
    fn tokenize_handles_unicode() {
        let tokens = tokenize("Tilisiirto: ÖVERFÖRING 12,50", 4);
        assert!(tokens.contains(&"tilisiirto".to_string()));
        assert!(tokens.contains(&"överföring".to_string()));
        assert!(!tokens.contains(&"12".to_string()));
    }
}
