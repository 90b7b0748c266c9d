use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::category::CategoryId;

/// One normalized row out of a bank export, as handed over by the file
/// normalizer. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub posted_at: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub merchant: Option<String>,
    pub memo: Option<String>,
    pub csv_main_category: Option<String>,
    pub csv_category: Option<String>,
    pub csv_subcategory: Option<String>,
    pub source_account: Option<String>,
    pub owner: Option<String>,
    pub is_income: bool,
}

impl RawRecord {
    /// Merchant if present, else memo. The text the pipeline keys on.
    pub fn descriptor(&self) -> Option<&str> {
        self.merchant
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.memo.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

/// Where a transaction's category assignment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    /// Taken from the bank export's own category labels.
    Imported,
    /// Assigned or confirmed by the user.
    User,
    /// Assigned by a built-in rule (transfer pairing).
    Rule,
    /// Assigned from a mined merchant/keyword pattern.
    Mined,
    /// Assigned by the external model fallback.
    Model,
}

impl CategorySource {
    pub fn as_str(self) -> &'static str {
        match self {
            CategorySource::Imported => "imported",
            CategorySource::User => "user",
            CategorySource::Rule => "rule",
            CategorySource::Mined => "mined",
            CategorySource::Model => "model",
        }
    }
}

impl fmt::Display for CategorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CategorySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imported" => Ok(CategorySource::Imported),
            "user" => Ok(CategorySource::User),
            "rule" => Ok(CategorySource::Rule),
            "mined" => Ok(CategorySource::Mined),
            "model" => Ok(CategorySource::Model),
            other => Err(format!("Unknown category source: '{other}'")),
        }
    }
}

/// Which stage of the resolution cascade produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Exact,
    Fuzzy,
    Mined,
    Model,
    None,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Fuzzy => "fuzzy",
            MatchMethod::Mined => "mined",
            MatchMethod::Model => "model",
            MatchMethod::None => "none",
        }
    }

    /// The source label stored on a transaction categorized by this method.
    pub fn source(self) -> Option<CategorySource> {
        match self {
            MatchMethod::Exact | MatchMethod::Fuzzy => Some(CategorySource::Imported),
            MatchMethod::Mined => Some(CategorySource::Mined),
            MatchMethod::Model => Some(CategorySource::Model),
            MatchMethod::None => None,
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of running one record through the category cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub category_id: Option<CategoryId>,
    pub confidence: Option<f64>,
    pub method: MatchMethod,
    pub review_needed: bool,
}

impl Resolution {
    pub fn matched(category_id: CategoryId, confidence: f64, method: MatchMethod) -> Self {
        Resolution {
            category_id: Some(category_id),
            confidence: Some(confidence.clamp(0.0, 1.0)),
            method,
            review_needed: false,
        }
    }

    pub fn none() -> Self {
        Resolution {
            category_id: None,
            confidence: None,
            method: MatchMethod::None,
            review_needed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<i64>,
    pub user_id: i64,
    pub posted_at: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub merchant: Option<String>,
    pub memo: Option<String>,
    pub category_id: Option<CategoryId>,
    pub source_category: Option<CategorySource>,
    pub confidence: Option<f64>,
    pub review_needed: bool,
    pub import_batch_id: i64,
    pub dedupe_hash: String,
    pub transfer_pair_id: Option<String>,
    pub source_account: Option<String>,
}

impl Transaction {
    /// Build a transaction from a surviving record and its resolution.
    pub fn from_record(
        record: &RawRecord,
        user_id: i64,
        import_batch_id: i64,
        dedupe_hash: String,
        resolution: &Resolution,
    ) -> Self {
        Transaction {
            id: None,
            user_id,
            posted_at: record.posted_at,
            amount: record.amount,
            currency: record.currency.clone(),
            merchant: record.merchant.clone(),
            memo: record.memo.clone(),
            category_id: resolution.category_id,
            source_category: resolution.method.source(),
            confidence: resolution.confidence.map(|c| c.clamp(0.0, 1.0)),
            review_needed: resolution.review_needed,
            import_batch_id,
            dedupe_hash,
            transfer_pair_id: None,
            source_account: record.source_account.clone(),
        }
    }

    /// `review_needed == false` must imply a category is set.
    pub fn review_invariant_holds(&self) -> bool {
        self.review_needed || self.category_id.is_some()
    }
}
