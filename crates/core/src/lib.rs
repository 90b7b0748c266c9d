pub mod batch;
pub mod category;
pub mod transaction;

pub use batch::{BatchStatus, ImportBatch, ImportSummary};
pub use category::{Category, CategoryError, CategoryId, CategoryKind, CategoryTree};
pub use transaction::{CategorySource, MatchMethod, RawRecord, Resolution, Transaction};
