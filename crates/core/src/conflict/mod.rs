//! Conflict handling for the chain file.
//!
//! 1. **Extraction** -- splitting merge output into base / incoming regions.
//! 2. **Divergence** -- which entries each side has that the other lacks.

pub mod divergence;
pub mod extractor;

pub use divergence::DivergenceSet;
pub use extractor::{ConflictExtractor, ConflictRegion, MarkerOrder};
