use sha2::{Digest, Sha256};
use std::collections::HashSet;

use kassa_core::RawRecord;

/// Deterministic content fingerprint over the normalized record tuple
/// (amount, posted date, lower-cased trimmed merchant-or-memo, source
/// account). This hash, not a database constraint, is the dedupe
/// authority, so it must stay stable across re-imports of overlapping
/// exports.
pub fn fingerprint(record: &RawRecord) -> String {
    let descriptor = record
        .descriptor()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    let account = record
        .source_account
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(record.amount.normalize().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(record.posted_at.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(descriptor.as_bytes());
    hasher.update(b"|");
    hasher.update(account.as_bytes());

    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Records that survived dedupe, paired with their fingerprints, plus the
/// duplicate count. Input order is preserved; first occurrence wins.
#[derive(Debug)]
pub struct DedupeOutcome {
    pub fresh: Vec<(RawRecord, String)>,
    pub duplicates: u32,
}

/// Filter out records whose fingerprint was already seen, either in a
/// previous import (`known_hashes`) or earlier in this same batch.
pub fn filter_new(records: Vec<RawRecord>, known_hashes: &HashSet<String>) -> DedupeOutcome {
    let mut fresh = Vec::with_capacity(records.len());
    let mut seen_in_batch: HashSet<String> = HashSet::new();
    let mut duplicates = 0u32;

    for record in records {
        let hash = fingerprint(&record);
        if known_hashes.contains(&hash) || !seen_in_batch.insert(hash.clone()) {
            duplicates += 1;
            continue;
        }
        fresh.push((record, hash));
    }

    DedupeOutcome { fresh, duplicates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn record(date: (i32, u32, u32), amount: &str, merchant: &str, account: &str) -> RawRecord {
        RawRecord {
            posted_at: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            amount: Decimal::from_str(amount).unwrap(),
            currency: "EUR".to_string(),
            merchant: Some(merchant.to_string()),
            memo: None,
            csv_main_category: None,
            csv_category: None,
            csv_subcategory: None,
            source_account: Some(account.to_string()),
            owner: None,
            is_income: false,
        }
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = record((2024, 1, 15), "-49.99", "AMAZON", "FI21");
        let b = record((2024, 1, 15), "-49.99", "AMAZON", "FI21");
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn fingerprint_normalizes_case_and_whitespace() {
        let a = record((2024, 1, 15), "-49.99", "  Amazon ", "FI21");
        let b = record((2024, 1, 15), "-49.99", "AMAZON", "FI21");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_normalizes_trailing_zeroes() {
        let mut a = record((2024, 1, 15), "-49.99", "AMAZON", "FI21");
        a.amount = Decimal::from_str("-49.9900").unwrap();
        let b = record((2024, 1, 15), "-49.99", "AMAZON", "FI21");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_distinguishes_fields() {
        let base = record((2024, 1, 15), "-49.99", "AMAZON", "FI21");
        assert_ne!(
            fingerprint(&base),
            fingerprint(&record((2024, 1, 16), "-49.99", "AMAZON", "FI21"))
        );
        assert_ne!(
            fingerprint(&base),
            fingerprint(&record((2024, 1, 15), "-49.98", "AMAZON", "FI21"))
        );
        assert_ne!(
            fingerprint(&base),
            fingerprint(&record((2024, 1, 15), "-49.99", "AMAZON", "FI22"))
        );
    }

    #[test]
    fn known_hashes_are_filtered() {
        let first = record((2024, 1, 15), "-5.00", "STARBUCKS", "FI21");
        let known: HashSet<String> = [fingerprint(&first)].into_iter().collect();
        let outcome = filter_new(
            vec![first, record((2024, 1, 16), "-7.50", "K-MARKET", "FI21")],
            &known,
        );
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.fresh.len(), 1);
        assert_eq!(outcome.fresh[0].0.merchant.as_deref(), Some("K-MARKET"));
    }

    #[test]
    fn first_seen_wins_within_batch() {
        let outcome = filter_new(
            vec![
                record((2024, 1, 15), "-5.00", "STARBUCKS", "FI21"),
                record((2024, 1, 15), "-5.00", "STARBUCKS", "FI21"),
                record((2024, 1, 15), "-5.00", "STARBUCKS", "FI21"),
            ],
            &HashSet::new(),
        );
        assert_eq!(outcome.fresh.len(), 1);
        assert_eq!(outcome.duplicates, 2);
    }

    #[test]
    fn identical_file_twice_is_all_duplicates() {
        let rows = vec![
            record((2024, 1, 15), "-5.00", "STARBUCKS", "FI21"),
            record((2024, 1, 16), "-7.50", "K-MARKET", "FI21"),
        ];
        let first_pass = filter_new(rows.clone(), &HashSet::new());
        let known: HashSet<String> =
            first_pass.fresh.iter().map(|(_, h)| h.clone()).collect();
        let second_pass = filter_new(rows, &known);
        assert_eq!(second_pass.fresh.len(), 0);
        assert_eq!(second_pass.duplicates, 2);
    }
}
