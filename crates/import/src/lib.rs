pub mod dedupe;
pub mod miner;
pub mod model;
pub mod resolver;
pub mod transfer;

pub use dedupe::{filter_new, fingerprint, DedupeOutcome};
pub use miner::{mine, MinedPattern, MinedPatterns, MinerConfig};
pub use model::{
    DisabledModel, HttpModelClient, ModelClient, ModelError, ModelRequest, ModelSuggestion,
};
pub use resolver::{CategoryResolver, Matcher, EXACT_CONFIDENCE, FUZZY_CONFIDENCE};
pub use transfer::{
    TransferCandidate, TransferConfig, TransferPair, TransferPairDetector, TRANSFER_KEYWORDS,
};
