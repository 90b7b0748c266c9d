use tracing::{debug, warn};

use kassa_core::{CategoryId, CategoryKind, CategoryTree, MatchMethod, RawRecord, Resolution};

use crate::miner::{tokenize, MinedPatterns};
use crate::model::{ModelClient, ModelRequest};

/// Confidence for a CSV label that equals a user category name.
pub const EXACT_CONFIDENCE: f64 = 0.95;
/// Confidence for a substring match between a CSV label and a category
/// name. Fixed at 0.70: inside the 0.6–0.8 band, below exact, and level
/// with the mined-pattern floor so the cascade order alone decides.
pub const FUZZY_CONFIDENCE: f64 = 0.70;

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMatch {
    pub category_id: CategoryId,
    pub confidence: f64,
}

/// One stage of the resolution cascade. Stages are independent and
/// side-effect free; the resolver tries them strictly in order.
pub trait Matcher {
    fn method(&self) -> MatchMethod;
    fn attempt(&self, record: &RawRecord) -> Option<CategoryMatch>;
}

/// CSV labels of a record in lookup priority order: subcategory first,
/// then category. Blank labels are skipped.
fn csv_labels(record: &RawRecord) -> impl Iterator<Item = &str> {
    [record.csv_subcategory.as_deref(), record.csv_category.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Stage 1: a CSV label equals a user category name (trimmed,
/// case-insensitive).
pub struct ExactMatcher<'a> {
    tree: &'a CategoryTree,
}

impl<'a> ExactMatcher<'a> {
    pub fn new(tree: &'a CategoryTree) -> Self {
        Self { tree }
    }
}

impl Matcher for ExactMatcher<'_> {
    fn method(&self) -> MatchMethod {
        MatchMethod::Exact
    }

    fn attempt(&self, record: &RawRecord) -> Option<CategoryMatch> {
        csv_labels(record).find_map(|label| {
            let category = self.tree.find_by_name(label)?;
            Some(CategoryMatch {
                category_id: category.id?,
                confidence: EXACT_CONFIDENCE,
            })
        })
    }
}

/// Stage 2: a CSV label is a substring of a category name, or the other
/// way around. Ties resolve to the smallest category id.
pub struct FuzzyMatcher<'a> {
    tree: &'a CategoryTree,
}

impl<'a> FuzzyMatcher<'a> {
    pub fn new(tree: &'a CategoryTree) -> Self {
        Self { tree }
    }
}

impl Matcher for FuzzyMatcher<'_> {
    fn method(&self) -> MatchMethod {
        MatchMethod::Fuzzy
    }

    fn attempt(&self, record: &RawRecord) -> Option<CategoryMatch> {
        for label in csv_labels(record) {
            let needle = label.to_lowercase();
            let hit = self
                .tree
                .iter()
                .filter(|c| {
                    let name = c.name.trim().to_lowercase();
                    !name.is_empty() && (name.contains(&needle) || needle.contains(&name))
                })
                .min_by_key(|c| c.id);
            if let Some(category) = hit {
                if let Some(id) = category.id {
                    return Some(CategoryMatch {
                        category_id: id,
                        confidence: FUZZY_CONFIDENCE,
                    });
                }
            }
        }
        None
    }
}

/// Stage 3: merchant key, else memo keyword tokens, against the strong
/// mined patterns. Confidence is the mined ratio.
pub struct MinedMatcher<'a> {
    tree: &'a CategoryTree,
    patterns: &'a MinedPatterns,
    min_token_len: usize,
}

impl<'a> MinedMatcher<'a> {
    pub fn new(tree: &'a CategoryTree, patterns: &'a MinedPatterns, min_token_len: usize) -> Self {
        Self {
            tree,
            patterns,
            min_token_len,
        }
    }
}

impl Matcher for MinedMatcher<'_> {
    fn method(&self) -> MatchMethod {
        MatchMethod::Mined
    }

    fn attempt(&self, record: &RawRecord) -> Option<CategoryMatch> {
        if let Some(merchant) = record.merchant.as_deref() {
            let key = merchant.trim().to_lowercase();
            if let Some(pattern) = self.patterns.merchants.get(&key) {
                if self.tree.contains(pattern.category_id) {
                    return Some(CategoryMatch {
                        category_id: pattern.category_id,
                        confidence: pattern.confidence,
                    });
                }
            }
        }

        let memo = record.memo.as_deref()?;
        // First matching token in memo order wins.
        for token in tokenize(memo, self.min_token_len) {
            if let Some(pattern) = self.patterns.keywords.get(&token) {
                if self.tree.contains(pattern.category_id) {
                    return Some(CategoryMatch {
                        category_id: pattern.category_id,
                        confidence: pattern.confidence,
                    });
                }
            }
        }
        None
    }
}

/// The cascade: exact → fuzzy → mined → model. The first stage that
/// matches wins; later stages are not consulted.
pub struct CategoryResolver<'a, M> {
    matchers: Vec<Box<dyn Matcher + 'a>>,
    tree: &'a CategoryTree,
    patterns: &'a MinedPatterns,
    model: Option<&'a M>,
}

impl<'a, M: ModelClient> CategoryResolver<'a, M> {
    pub fn new(
        tree: &'a CategoryTree,
        patterns: &'a MinedPatterns,
        min_token_len: usize,
        model: Option<&'a M>,
    ) -> Self {
        let matchers: Vec<Box<dyn Matcher + 'a>> = vec![
            Box::new(ExactMatcher::new(tree)),
            Box::new(FuzzyMatcher::new(tree)),
            Box::new(MinedMatcher::new(tree, patterns, min_token_len)),
        ];
        CategoryResolver {
            matchers,
            tree,
            patterns,
            model,
        }
    }

    pub async fn resolve(&self, record: &RawRecord) -> Resolution {
        for matcher in &self.matchers {
            if let Some(hit) = matcher.attempt(record) {
                return Resolution::matched(hit.category_id, hit.confidence, matcher.method());
            }
        }

        if let Some(model) = self.model {
            let request = ModelRequest::for_record(self.tree, self.patterns, record);
            match model.suggest(&request).await {
                Ok(suggestion) => {
                    let kind = if record.is_income {
                        CategoryKind::Income
                    } else {
                        CategoryKind::Expense
                    };
                    match self.tree.resolve_path(&suggestion.category_path, Some(kind)) {
                        Some(id) => {
                            return Resolution::matched(
                                id,
                                suggestion.confidence,
                                MatchMethod::Model,
                            );
                        }
                        None => {
                            debug!(
                                path = %suggestion.category_path,
                                "model suggested an unmapped category path"
                            );
                        }
                    }
                }
                // Timeouts and parse failures degrade to no-match, never
                // to a batch error.
                Err(e) => warn!("model fallback unavailable: {e}"),
            }
        }

        Resolution::none()
    }
}
