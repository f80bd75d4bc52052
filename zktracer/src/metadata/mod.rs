//! Per-transaction metadata and first/last occurrence maps.

mod occurrences;
mod transaction;

pub use occurrences::*;
pub use transaction::*;
