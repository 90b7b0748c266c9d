use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Ancestor walks give up after this many hops. A legal tree never gets
/// close; the cap only guards against corrupted parent links.
const MAX_DEPTH: usize = 64;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CategoryId(pub i64);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Income,
    Expense,
    Transfer,
}

impl CategoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CategoryKind::Income => "income",
            CategoryKind::Expense => "expense",
            CategoryKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CategoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(CategoryKind::Income),
            "expense" => Ok(CategoryKind::Expense),
            "transfer" => Ok(CategoryKind::Transfer),
            other => Err(format!("Unknown category kind: '{other}'")),
        }
    }
}

#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("Category {0} not found")]
    NotFound(i64),
    #[error("Parent category {0} not found")]
    ParentNotFound(i64),
    #[error("Moving category {0} under its own descendant would create a cycle")]
    Cycle(i64),
}

/// One node of a user's category tree. `id` is `None` until the row is
/// inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Option<CategoryId>,
    pub user_id: i64,
    pub parent_id: Option<CategoryId>,
    pub name: String,
    pub kind: CategoryKind,
    pub code: String,
}

impl Category {
    pub fn new(user_id: i64, name: &str, kind: CategoryKind, code: &str) -> Self {
        Category {
            id: None,
            user_id,
            parent_id: None,
            name: name.to_string(),
            kind,
            code: code.to_string(),
        }
    }

    pub fn child_of(mut self, parent: CategoryId) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

/// In-memory snapshot of one user's categories, indexed by id. Built once
/// per operation from the stored rows; lookups during categorization never
/// touch the database.
#[derive(Debug, Clone, Default)]
pub struct CategoryTree {
    by_id: HashMap<CategoryId, Category>,
}

impl CategoryTree {
    /// Categories without an id are skipped; only persisted rows can be
    /// addressed by the tree.
    pub fn from_categories(categories: Vec<Category>) -> Self {
        let by_id = categories
            .into_iter()
            .filter_map(|c| Some((c.id?, c)))
            .collect();
        CategoryTree { by_id }
    }

    pub fn get(&self, id: CategoryId) -> Option<&Category> {
        self.by_id.get(&id)
    }

    pub fn contains(&self, id: CategoryId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.by_id.values()
    }

    /// Check that re-parenting `id` under `new_parent` keeps the tree
    /// acyclic: the parent must exist and must not be `id` itself or one
    /// of its descendants.
    pub fn validate_parent(
        &self,
        id: CategoryId,
        new_parent: CategoryId,
    ) -> Result<(), CategoryError> {
        if !self.contains(id) {
            return Err(CategoryError::NotFound(id.0));
        }
        if !self.contains(new_parent) {
            return Err(CategoryError::ParentNotFound(new_parent.0));
        }

        // Walk up from the proposed parent; hitting `id` means the parent
        // is inside `id`'s own subtree.
        let mut current = Some(new_parent);
        for _ in 0..MAX_DEPTH {
            let Some(cursor) = current else {
                return Ok(());
            };
            if cursor == id {
                return Err(CategoryError::Cycle(id.0));
            }
            current = self.get(cursor).and_then(|c| c.parent_id);
        }
        Err(CategoryError::Cycle(id.0))
    }

    /// Full display path from root to `id`, segments joined with " > ".
    pub fn path(&self, id: CategoryId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = Some(id);
        for _ in 0..MAX_DEPTH {
            let Some(cursor) = current else {
                segments.reverse();
                return Some(segments.join(" > "));
            };
            let category = self.get(cursor)?;
            segments.push(category.name.clone());
            current = category.parent_id;
        }
        None
    }

    /// Case-insensitive name lookup, trimmed on both sides. Duplicate
    /// names resolve to the smallest id so lookups are deterministic.
    pub fn find_by_name(&self, name: &str) -> Option<&Category> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.by_id
            .values()
            .filter(|c| c.name.trim().to_lowercase() == needle)
            .min_by_key(|c| c.id)
    }

    /// Map a display path back to a category id by its leaf segment,
    /// optionally constrained to one kind. Only the leaf is compared;
    /// external callers rarely reproduce the full ancestor chain exactly.
    pub fn resolve_path(&self, path: &str, kind: Option<CategoryKind>) -> Option<CategoryId> {
        let leaf = path.rsplit('>').next()?.trim();
        if leaf.is_empty() {
            return None;
        }
        let needle = leaf.to_lowercase();
        self.by_id
            .values()
            .filter(|c| c.name.trim().to_lowercase() == needle)
            .filter(|c| kind.map_or(true, |k| c.kind == k))
            .min_by_key(|c| c.id)?
            .id
    }

    /// The category transfer pairs land in: the transfer-kind node with
    /// the smallest id, if the user has one at all.
    pub fn transfers_category(&self) -> Option<&Category> {
        self.by_id
            .values()
            .filter(|c| c.kind == CategoryKind::Transfer)
            .min_by_key(|c| c.id)
    }
}
