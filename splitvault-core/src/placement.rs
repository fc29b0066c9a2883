use crate::error::{Result, VaultError};
use rand::Rng;

/// Default maximum part size, in bytes.
pub const DEFAULT_SHARD_SIZE: u64 = 8 * 1000 * 1000;

#[derive(Debug, Clone)]
pub struct PlacementConfig {
    pub shard_size: u64,
    pub force_spreading: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            shard_size: DEFAULT_SHARD_SIZE,
            force_spreading: true,
        }
    }
}

/// How a file of a known length is cut into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    pub total_len: u64,
    pub part_count: u32,
    pub amount_per_chunk: u64,
    pub remainder: u64,
}

impl ShardPlan {
    pub fn compute(
        total_len: u64,
        config: &PlacementConfig,
        reachable_nodes: usize,
    ) -> Result<Self> {
        if reachable_nodes == 0 {
            return Err(VaultError::NoReachableNodes);
        }
        if total_len == 0 {
            return Err(VaultError::InvalidRequest(
                "empty files cannot be stored".to_string(),
            ));
        }
        if config.shard_size == 0 {
            return Err(VaultError::Config("shard size must be positive".to_string()));
        }

        let mut loops = total_len.div_ceil(config.shard_size);
        if config.force_spreading && loops < reachable_nodes as u64 {
            loops = reachable_nodes as u64;
        }
        // never produce empty parts
        loops = loops.min(total_len);

        let part_count = u32::try_from(loops).map_err(|_| {
            VaultError::InvalidRequest(format!(
                "file of {} bytes needs too many parts",
                total_len
            ))
        })?;

        Ok(Self {
            total_len,
            part_count,
            amount_per_chunk: total_len / loops,
            remainder: total_len % loops,
        })
    }

    /// Plaintext length of part `seq`. The last part absorbs the remainder.
    pub fn part_len(&self, seq: u32) -> u64 {
        if seq + 1 == self.part_count {
            self.amount_per_chunk + self.remainder
        } else {
            self.amount_per_chunk
        }
    }

    pub fn part_lengths(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.part_count).map(|seq| self.part_len(seq))
    }
}

/// Picks the node for each part.
pub trait NodeSelector: Send + Sync {
    fn select(&self, candidates: usize) -> usize;
}

/// Independent uniform pick per part, with replacement.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformRandomSelector;

impl NodeSelector for UniformRandomSelector {
    fn select(&self, candidates: usize) -> usize {
        rand::thread_rng().gen_range(0..candidates)
    }
}
