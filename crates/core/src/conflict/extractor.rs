//! Conflict-marker extraction.
//!
//! Scans merge output for `<<<<<<<` / `=======` / `>>>>>>>` blocks and
//! returns the text of both sides. A `|||||||` ancestor section (diff3
//! style) is dropped. Unterminated or out-of-order markers yield no region
//! for that block rather than an error.

use serde::{Deserialize, Serialize};
use tracing::debug;

const START_MARKER: &str = "<<<<<<<";
const ANCESTOR_MARKER: &str = "|||||||";
const SEPARATOR_MARKER: &str = "=======";
const END_MARKER: &str = ">>>>>>>";

/// One conflicted hunk, split into its two sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    /// Text of the side whose history is kept as-is.
    pub base: String,
    /// Text of the side whose new entries get renumbered.
    pub incoming: String,
}

/// Which side a conflict block lists first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarkerOrder {
    /// Upper half is the base side.
    #[default]
    BaseFirst,
    /// Upper half is the incoming side, as when the base branch is merged
    /// into the checked-out branch.
    IncomingFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    Upper,
    Ancestor,
    Lower,
}

/// Stateless extractor of conflict regions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictExtractor {
    order: MarkerOrder,
}

impl ConflictExtractor {
    pub fn new(order: MarkerOrder) -> Self {
        Self { order }
    }

    /// Extract every well-formed conflict block of `input`, in document
    /// order. Both sides are trimmed.
    pub fn extract(&self, input: &str) -> Vec<ConflictRegion> {
        let mut regions = Vec::new();
        let mut state = State::Outside;
        let mut upper: Vec<&str> = Vec::new();
        let mut lower: Vec<&str> = Vec::new();

        for line in input.lines() {
            if line.starts_with(START_MARKER) {
                if state != State::Outside {
                    debug!("conflict block restarted before its end marker, discarding");
                }
                upper.clear();
                lower.clear();
                state = State::Upper;
                continue;
            }

            match state {
                State::Outside => {}
                State::Upper | State::Ancestor if line.trim_end() == SEPARATOR_MARKER => {
                    state = State::Lower;
                }
                State::Upper if line.starts_with(ANCESTOR_MARKER) => state = State::Ancestor,
                State::Upper => upper.push(line),
                State::Ancestor => {}
                State::Lower if line.starts_with(END_MARKER) => {
                    regions.push(self.region(upper.join("\n"), lower.join("\n")));
                    upper.clear();
                    lower.clear();
                    state = State::Outside;
                }
                State::Lower => lower.push(line),
            }
        }

        if state != State::Outside {
            debug!("unterminated conflict block at end of input, discarding");
        }
        debug!(count = regions.len(), "extracted conflict regions");
        regions
    }

    fn region(&self, upper: String, lower: String) -> ConflictRegion {
        let (base, incoming) = match self.order {
            MarkerOrder::BaseFirst => (upper, lower),
            MarkerOrder::IncomingFirst => (lower, upper),
        };
        ConflictRegion {
            base: base.trim().to_string(),
            incoming: incoming.trim().to_string(),
        }
    }
}
