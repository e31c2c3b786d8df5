//! Shard-group assignment and key lookup.
//!
//! The oracle is built once from the static view and mutated only by
//! [`Oracle::update_view`]. All lookups are deterministic: the view is
//! sorted lexicographically before assignment, so construction order does
//! not matter.

use std::collections::HashMap;

use serde::Serialize;

use crate::{Result, RingError, LARGE_RING_EDGE, MEDIUM_RING_EDGE, SMALL_RING_EDGE, VIRTUAL_FACTOR};

/// FNV-1a 32-bit: stable, non-cryptographic, cheap. Ring positions and key
/// placement both go through this, so the constant must never change.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Pick the ring modulus for a view size. Primes keep positions spread when
/// hashes share factors.
fn ring_edge_for(view_len: usize) -> u32 {
    match view_len {
        n if n < 100 => SMALL_RING_EDGE,
        n if n < 250 => MEDIUM_RING_EDGE,
        _ => LARGE_RING_EDGE,
    }
}

/// The partitioning oracle.
///
/// Owns the shard groups and the virtual ring; answers which shard a key
/// belongs to and which replicas form each shard.
pub struct Oracle {
    host_addr: String,
    view: Vec<String>,
    repl_factor: usize,
    num_shards: usize,
    shard_groups: Vec<Vec<String>>,
    ring: Vec<u32>,
    owners: HashMap<u32, usize>,
    ring_edge: u32,
}

/// Serializable snapshot of the ring, for the diagnostic endpoint.
#[derive(Debug, Serialize)]
pub struct RingState {
    /// This node's id.
    pub host_addr: String,
    /// The sorted view.
    pub view: Vec<String>,
    /// Number of physical shards.
    pub num_shards: usize,
    /// Replica membership per shard.
    pub shard_groups: Vec<Vec<String>>,
    /// The ring modulus in effect.
    pub ring_edge: u32,
}

impl Oracle {
    /// Build the oracle for `host_addr` over `view` with `repl_factor`
    /// replicas per shard.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidReplication`] for a zero factor,
    /// [`RingError::EmptyView`] for an empty view, and
    /// [`RingError::TooFewNodes`] when the view cannot fill a single shard.
    pub fn new(host_addr: impl Into<String>, view: Vec<String>, repl_factor: usize) -> Result<Self> {
        let mut oracle = Self {
            host_addr: host_addr.into(),
            view: Vec::new(),
            repl_factor: 0,
            num_shards: 0,
            shard_groups: Vec::new(),
            ring: Vec::new(),
            owners: HashMap::new(),
            ring_edge: SMALL_RING_EDGE,
        };
        oracle.update_view(view, repl_factor)?;
        Ok(oracle)
    }

    /// Rebuild shard groups and the virtual ring for a new view.
    ///
    /// The previous mapping is discarded wholesale; keys may move shards.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Oracle::new`].
    pub fn update_view(&mut self, mut view: Vec<String>, repl_factor: usize) -> Result<()> {
        if repl_factor == 0 {
            return Err(RingError::InvalidReplication(repl_factor));
        }
        if view.is_empty() {
            return Err(RingError::EmptyView);
        }
        view.sort();

        let num_shards = view.len() / repl_factor;
        if num_shards == 0 {
            return Err(RingError::TooFewNodes {
                view: view.len(),
                repl_factor,
            });
        }

        self.ring_edge = ring_edge_for(view.len());
        self.shard_groups = distribute_nodes(&view, num_shards);
        self.num_shards = num_shards;
        self.repl_factor = repl_factor;
        self.view = view;

        self.ring = Vec::with_capacity(num_shards * VIRTUAL_FACTOR);
        self.owners = HashMap::with_capacity(num_shards * VIRTUAL_FACTOR);
        for shard in 0..num_shards {
            for virtual_shard in 0..VIRTUAL_FACTOR {
                let label = format!("{shard}{virtual_shard}");
                let position = self.partition_hash(&label);
                self.ring.push(position);
                self.owners.insert(position, shard);
            }
        }
        self.ring.sort_unstable();

        tracing::debug!(
            shards = self.num_shards,
            ring_edge = self.ring_edge,
            view = self.view.len(),
            "ring rebuilt"
        );
        Ok(())
    }

    /// Hash a token into ring coordinates.
    fn partition_hash(&self, token: &str) -> u32 {
        fnv1a(token.as_bytes()) % self.ring_edge
    }

    /// The first virtual position at or after `ring_val`, wrapping to the
    /// start of the ring if none.
    fn next_position(&self, ring_val: u32) -> u32 {
        let i = self.ring.partition_point(|&p| p < ring_val);
        if i < self.ring.len() {
            self.ring[i]
        } else {
            self.ring[0]
        }
    }

    /// The physical shard a key belongs to.
    ///
    /// Deterministic for a given view and replication factor.
    pub fn get_match(&self, key: &str) -> usize {
        let position = self.next_position(self.partition_hash(key));
        // every ring position was inserted with an owner
        self.owners.get(&position).copied().unwrap_or(0)
    }

    /// The replica group for a physical shard id.
    pub fn shard_replicas(&self, shard: usize) -> &[String] {
        &self.shard_groups[shard]
    }

    /// All shard groups, indexed by shard id.
    pub fn shard_groups(&self) -> &[Vec<String>] {
        &self.shard_groups
    }

    /// The shard id whose group contains `node`, if any.
    pub fn shard_id_of(&self, node: &str) -> Option<usize> {
        self.shard_groups
            .iter()
            .position(|group| group.iter().any(|member| member == node))
    }

    /// The replica group containing `node`.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::UnknownNode`] if `node` is in no group.
    pub fn peer_replicas(&self, node: &str) -> Result<&[String]> {
        let shard = self
            .shard_id_of(node)
            .ok_or_else(|| RingError::UnknownNode(node.to_string()))?;
        Ok(&self.shard_groups[shard])
    }

    /// Base replica count per shard.
    pub fn num_replicas(&self) -> usize {
        self.view.len() / self.num_shards
    }

    /// Number of physical shards.
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// The sorted view.
    pub fn view(&self) -> &[String] {
        &self.view
    }

    /// This node's id.
    pub fn host_addr(&self) -> &str {
        &self.host_addr
    }

    /// Position of `node` in the sorted view; drives the bring-up chain.
    pub fn view_index(&self, node: &str) -> Option<usize> {
        self.view.iter().position(|member| member == node)
    }

    /// JSON diagnostic of the ring.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::State`] if serialization fails.
    pub fn state(&self) -> Result<String> {
        let state = RingState {
            host_addr: self.host_addr.clone(),
            view: self.view.clone(),
            num_shards: self.num_shards,
            shard_groups: self.shard_groups.clone(),
            ring_edge: self.ring_edge,
        };
        serde_json::to_string(&state).map_err(|e| RingError::State(e.to_string()))
    }
}

/// Walk the sorted view into `num_shards` groups. The first
/// `view_len mod num_shards` shards absorb one extra node each so the
/// partition is exhaustive.
fn distribute_nodes(view: &[String], num_shards: usize) -> Vec<Vec<String>> {
    let base = view.len() / num_shards;
    let overflow = view.len() % num_shards;

    let mut groups = Vec::with_capacity(num_shards);
    let mut cursor = 0;
    for shard in 0..num_shards {
        let take = if shard < overflow { base + 1 } else { base };
        groups.push(view[cursor..cursor + take].to_vec());
        cursor += take;
    }
    groups
}
