//! Deterministic heuristic pairing.
//!
//! Used only when no curated mapping exists for a pair. Both strategies are
//! pure functions of the sorted endpoint key lists, so reruns produce the
//! same associations.

use std::sync::Arc;

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicStrategy {
    /// `from[i]` pairs with `to[i % to.len()]`.
    RoundRobin,
    /// Each `from` key is hashed into `fanout` distinct `to` buckets.
    HashBucket { fanout: usize },
}

impl HeuristicStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            HeuristicStrategy::RoundRobin       => "round_robin",
            HeuristicStrategy::HashBucket { .. } => "hash_bucket",
        }
    }

    /// Evidence tag carried by every association this strategy produces.
    pub fn evidence(&self) -> String {
        format!("heuristic:{}", self.name())
    }

    /// Lazily pair sorted key lists.
    pub fn pairs(
        self,
        from_keys: Arc<Vec<String>>,
        to_keys: Arc<Vec<String>>,
    ) -> Box<dyn Iterator<Item = (String, String)> + Send> {
        if to_keys.is_empty() {
            return Box::new(std::iter::empty());
        }
        match self {
            HeuristicStrategy::RoundRobin => Box::new(
                (0..from_keys.len())
                    .map(move |i| (from_keys[i].clone(), to_keys[i % to_keys.len()].clone())),
            ),
            HeuristicStrategy::HashBucket { fanout } => {
                let fanout = fanout.clamp(1, to_keys.len());
                Box::new((0..from_keys.len()).flat_map(move |i| {
                    let from = from_keys[i].clone();
                    bucket_indices(&from, fanout, to_keys.len())
                        .into_iter()
                        .map(|j| (from.clone(), to_keys[j].clone()))
                        .collect::<Vec<_>>()
                }))
            }
        }
    }
}

/// `fanout` distinct indices in `0..len`, chosen by hashing `key`.
/// Collisions probe linearly to the next free slot.
fn bucket_indices(key: &str, fanout: usize, len: usize) -> Vec<usize> {
    let mut chosen: Vec<usize> = Vec::with_capacity(fanout);
    for salt in 0..fanout as u64 {
        let mut idx = (bucket_hash(key, salt) % len as u64) as usize;
        while chosen.contains(&idx) {
            idx = (idx + 1) % len;
        }
        chosen.push(idx);
    }
    chosen
}

fn bucket_hash(key: &str, salt: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(salt.to_be_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}
