use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Memo/merchant fragments that mark a likely account-to-account move.
/// Multi-language on purpose: Nordic bank exports mix English, Finnish
/// and Swedish wording.
pub const TRANSFER_KEYWORDS: &[&str] = &[
    "transfer",
    "siirto",
    "tilisiirto",
    "oma siirto",
    "överföring",
    "overforing",
    "girering",
    "wire",
];

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Trailing window of history to consider for pairing, in days.
    pub window_days: i64,
    /// Maximum posting-date gap between the two legs of a pair.
    pub max_day_gap: i64,
    /// Confidence assigned to both legs of an accepted pair.
    pub confidence: f64,
    /// Score for any valid pair.
    pub base_score: f64,
    /// Added when either leg's text mentions a transfer keyword.
    pub keyword_bonus: f64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            window_days: 90,
            max_day_gap: 3,
            confidence: 0.9,
            base_score: 1.0,
            keyword_bonus: 0.5,
        }
    }
}

/// A not-yet-paired transaction, reduced to the fields pairing needs.
#[derive(Debug, Clone)]
pub struct TransferCandidate {
    pub id: i64,
    pub posted_at: NaiveDate,
    pub amount: Decimal,
    pub account: Option<String>,
    /// Merchant and memo text, concatenated, for keyword scanning.
    pub text: Option<String>,
}

/// Two legs of one money movement, linked by a fresh shared id.
#[derive(Debug, Clone)]
pub struct TransferPair {
    pub pair_id: String,
    /// The negative-amount leg.
    pub outgoing_id: i64,
    /// The positive-amount leg.
    pub incoming_id: i64,
    pub score: f64,
}

pub struct TransferPairDetector {
    config: TransferConfig,
}

impl Default for TransferPairDetector {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}

impl TransferPairDetector {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Find disjoint transfer pairs among the candidates.
    ///
    /// Candidates are bucketed by exact absolute amount, so only
    /// same-amount pairs are ever scored; within a bucket, valid pairs
    /// are accepted greedily in descending score order. Greedy matching
    /// is not globally optimal and is accepted as such.
    pub fn detect(&self, candidates: &[TransferCandidate]) -> Vec<TransferPair> {
        let mut buckets: HashMap<Decimal, Vec<&TransferCandidate>> = HashMap::new();
        for candidate in candidates {
            if candidate.amount.is_zero() {
                continue;
            }
            buckets
                .entry(candidate.amount.abs().normalize())
                .or_default()
                .push(candidate);
        }

        let mut pairs = Vec::new();
        for bucket in buckets.values() {
            self.pair_bucket(bucket, &mut pairs);
        }
        pairs
    }

    fn pair_bucket(&self, bucket: &[&TransferCandidate], out: &mut Vec<TransferPair>) {
        // Score all valid pairs, then consume greedily from the top.
        let mut scored: Vec<(f64, &TransferCandidate, &TransferCandidate)> = Vec::new();
        for i in 0..bucket.len() {
            for j in (i + 1)..bucket.len() {
                if let Some(score) = self.score_pair(bucket[i], bucket[j]) {
                    scored.push((score, bucket[i], bucket[j]));
                }
            }
        }
        // Descending score; candidate ids break ties so runs are stable.
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then((a.1.id, a.2.id).cmp(&(b.1.id, b.2.id)))
        });

        let mut consumed: HashSet<i64> = HashSet::new();
        for (score, a, b) in scored {
            if consumed.contains(&a.id) || consumed.contains(&b.id) {
                continue;
            }
            consumed.insert(a.id);
            consumed.insert(b.id);
            let (outgoing, incoming) = if a.amount.is_sign_negative() {
                (a, b)
            } else {
                (b, a)
            };
            out.push(TransferPair {
                pair_id: Uuid::new_v4().to_string(),
                outgoing_id: outgoing.id,
                incoming_id: incoming.id,
                score,
            });
        }
    }

    /// `Some(score)` when the two candidates form a valid pairing:
    /// opposite signs, dates within the gap, and different accounts when
    /// both are known.
    fn score_pair(&self, a: &TransferCandidate, b: &TransferCandidate) -> Option<f64> {
        if a.amount.is_sign_negative() == b.amount.is_sign_negative() {
            return None;
        }
        let day_gap = (a.posted_at - b.posted_at).num_days().abs();
        if day_gap > self.config.max_day_gap {
            return None;
        }
        if let (Some(acc_a), Some(acc_b)) = (a.account.as_deref(), b.account.as_deref()) {
            if acc_a == acc_b {
                return None;
            }
        }

        let mut score = self.config.base_score;
        if has_transfer_keyword(a.text.as_deref()) || has_transfer_keyword(b.text.as_deref()) {
            score += self.config.keyword_bonus;
        }
        Some(score)
    }
}

fn has_transfer_keyword(text: Option<&str>) -> bool {
    let Some(text) = text else {
        return false;
    };
    let lowered = text.to_lowercase();
    TRANSFER_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}
