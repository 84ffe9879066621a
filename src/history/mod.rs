//! History compression - keeps the planning context bounded
//!
//! Long runs accumulate hundreds of human-readable history entries; the
//! compressor folds them into a token-budgeted view with three tiers of
//! fidelity (verbatim, per-iteration summary, milestone aggregate).

mod compressor;
mod tokens;

pub use compressor::{EntryKind, HistoryCompressor, ParsedEntry};
pub use tokens::estimate_tokens;
