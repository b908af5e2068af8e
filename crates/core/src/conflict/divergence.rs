//! Set difference between the two sides of a conflicted chain file.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// File names present on one side only, in each side's own order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceSet {
    pub base_only: Vec<String>,
    pub incoming_only: Vec<String>,
}

impl DivergenceSet {
    /// Compute both one-sided differences. Membership is by file name; order
    /// follows the source list.
    pub fn diff(base: &[String], incoming: &[String]) -> Self {
        Self {
            base_only: only_in(base, incoming),
            incoming_only: only_in(incoming, base),
        }
    }

    /// Both sides list the same entries.
    pub fn is_empty(&self) -> bool {
        self.base_only.is_empty() && self.incoming_only.is_empty()
    }
}

fn only_in(source: &[String], other: &[String]) -> Vec<String> {
    let other: HashSet<&str> = other.iter().map(String::as_str).collect();
    let out: Vec<String> = source
        .iter()
        .filter(|name| !other.contains(name.as_str()))
        .cloned()
        .collect();
    debug!(source = source.len(), only = out.len(), "computed one-sided difference");
    out
}
