//! Vector clocks: per-node counters recording observed causal history.
//!
//! A clock maps logical node ids to non-negative counters. Every node in the
//! view has an entry from construction; increments never insert new keys.
//! Two decodings of the same clock compare equal regardless of the key order
//! on the wire (the map is ordered).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error raised by clock mutation.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Attempted to increment a node that has no entry in the clock.
    #[error("node {0} not in view")]
    UnknownNode(String),
}

/// Convenience result type for clock operations.
pub type Result<T> = std::result::Result<T, ClockError>;

/// Mapping from node id to event counter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<String, u64>,
}

impl VectorClock {
    /// Build a clock with a zero entry for every node in the view.
    pub fn from_view<I, S>(view: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let counters = view.into_iter().map(|node| (node.into(), 0)).collect();
        Self { counters }
    }

    /// The counter for `node`, or `None` if the node has no entry.
    pub fn entry(&self, node: &str) -> Option<u64> {
        self.counters.get(node).copied()
    }

    /// The counter for `node`, treating an absent entry as zero history.
    pub fn entry_or_zero(&self, node: &str) -> u64 {
        self.entry(node).unwrap_or(0)
    }

    /// Number of nodes with an entry.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the clock has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Whether every entry is zero (or the clock is empty): the baseline
    /// state before any causal history has been observed.
    pub fn is_baseline(&self) -> bool {
        self.counters.values().all(|&v| v == 0)
    }

    /// Advance the entry for `node` by one.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::UnknownNode`] if `node` has no entry. There is
    /// no implicit insert: a missing entry means the view disagrees with the
    /// sender and must be surfaced, not papered over.
    pub fn increment(&mut self, node: &str) -> Result<u64> {
        match self.counters.get_mut(node) {
            Some(counter) => {
                *counter += 1;
                Ok(*counter)
            }
            None => Err(ClockError::UnknownNode(node.to_string())),
        }
    }

    /// Merge `other` into this clock, taking the elementwise maximum over
    /// the union of keys. The result is the supremum of the two histories.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &counter) in &other.counters {
            let entry = self.counters.entry(node.clone()).or_insert(0);
            if counter > *entry {
                *entry = counter;
            }
        }
    }

    /// Elementwise dominance check: does this clock contain at least the
    /// history recorded in `prev`?
    ///
    /// Returns `(valid, prev_is_baseline)`:
    ///
    /// - `valid` is false when `prev` has more entries than this clock, when
    ///   a nonzero entry of `prev` is absent here, or when any entry here is
    ///   smaller than its counterpart in `prev`. Absent keys count as equal
    ///   only when the compared value is zero.
    /// - `prev_is_baseline` reports whether every value in `prev` is zero;
    ///   callers use it to skip the sender refinement on first contact.
    pub fn dominates(&self, prev: &VectorClock) -> (bool, bool) {
        let baseline = prev.is_baseline();

        if self.counters.len() < prev.counters.len() {
            return (false, baseline);
        }

        for (node, &counter) in &prev.counters {
            match self.counters.get(node) {
                None if counter != 0 => return (false, baseline),
                Some(&own) if own < counter => return (false, baseline),
                _ => {}
            }
        }

        (true, baseline)
    }

    /// The full delivery rule for a message carrying this clock, sent by
    /// `sender` and judged against the observer clock `prev`.
    ///
    /// Dominance per [`VectorClock::dominates`], plus the causal-broadcast
    /// refinement: the message must be the next event of its sender, i.e.
    /// `self[sender] == prev[sender] + 1`. The refinement is skipped when
    /// `prev` is the all-zero baseline (first observed message) or has no
    /// entry for the sender.
    pub fn causally_follows(&self, sender: &str, prev: &VectorClock) -> bool {
        let (valid, baseline) = self.dominates(prev);

        if valid && baseline {
            return true;
        }

        if let Some(prev_sender) = prev.entry(sender) {
            if self.entry_or_zero(sender) != prev_sender + 1 {
                return false;
            }
        }

        valid
    }

    /// Iterate over `(node, counter)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(node, &counter)| (node.as_str(), counter))
    }
}

impl std::fmt::Display for VectorClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (node, counter)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{node}:{counter}")?;
        }
        write!(f, "}}")
    }
}
