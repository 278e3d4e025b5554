//! Leader election: decides which miners find a block at each iteration.

use std::fmt::Debug;

use dyn_clone::DynClone;
use rand::{rngs::StdRng, Rng};

use crate::node::{MinerInfo, NodeId};

/// Value credited to the creator of a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reward {
    pub value: f64,
    pub timestamp: u64,
    pub miner: NodeId,
}

/// Decides whether a miner wins the right to create a block.
pub trait ConsensusOracle: Debug + DynClone + Send + Sync {
    /// Returns true if `miner` finds one block in this iteration.
    fn can_mine(&mut self, miner: &MinerInfo, rng: &mut StdRng) -> bool;

    /// Splits one mining attempt of `miner` evenly across `candidates`
    /// parallel blocks. Element `i` is true if candidate `i` was found.
    fn can_mine_many(
        &mut self,
        miner: &MinerInfo,
        candidates: usize,
        rng: &mut StdRng,
    ) -> Vec<bool>;

    /// The reward for a block mined by `miner`.
    fn reward(&self, miner: &MinerInfo) -> Reward;
}

dyn_clone::clone_trait_object!(ConsensusOracle);

/// Which [`ConsensusOracle`] a simulation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleKind {
    /// [`PowOracle`], optionally recomputing total power every iteration.
    Pow { dynamic: bool },
    /// [`FixedDifficultyOracle`].
    FixedDifficulty,
}

impl Default for OracleKind {
    fn default() -> Self {
        OracleKind::Pow { dynamic: false }
    }
}

/// Proof-of-work oracle. A miner with power `p` finds a block with probability
/// `p / (block_interval * total_power)`.
///
/// When `dynamic` is set, `total_power` is resampled from the miners observed
/// during each iteration and used starting from the next one.
#[derive(Debug, Clone)]
pub struct PowOracle {
    block_interval: f64,
    total_power: f64,
    block_reward: f64,
    dynamic: bool,
    /// Iteration currently being accumulated.
    timestamp: u64,
    new_total_power: f64,
}

impl PowOracle {
    pub fn new(
        block_interval: u64,
        total_power: f64,
        block_reward: f64,
        dynamic: bool,
    ) -> Self {
        PowOracle {
            block_interval: block_interval as f64,
            total_power,
            block_reward,
            dynamic,
            timestamp: 0,
            new_total_power: 0.0,
        }
    }

    pub fn total_power(&self) -> f64 {
        self.total_power
    }

    fn observe(&mut self, miner: &MinerInfo) {
        if !self.dynamic {
            return;
        }
        if miner.timestamp != self.timestamp {
            if self.timestamp != 0 {
                self.total_power = self.new_total_power;
            }
            self.timestamp = miner.timestamp;
            self.new_total_power = 0.0;
        }
        self.new_total_power += miner.mine_power;
    }

    fn probability(&self, power: f64) -> f64 {
        if self.total_power > 0.0 {
            (power / (self.block_interval * self.total_power)).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl ConsensusOracle for PowOracle {
    fn can_mine(&mut self, miner: &MinerInfo, rng: &mut StdRng) -> bool {
        self.observe(miner);
        rng.gen::<f64>() < self.probability(miner.mine_power)
    }

    fn can_mine_many(
        &mut self,
        miner: &MinerInfo,
        candidates: usize,
        rng: &mut StdRng,
    ) -> Vec<bool> {
        self.observe(miner);
        if candidates == 0 {
            return vec![];
        }

        let p = self.probability(miner.mine_power / candidates as f64);
        (0..candidates).map(|_| rng.gen::<f64>() < p).collect()
    }

    fn reward(&self, miner: &MinerInfo) -> Reward {
        Reward {
            value: self.block_reward,
            timestamp: miner.timestamp,
            miner: miner.id,
        }
    }
}

/// Uses each miner's precomputed `mine_probability` as its chance of finding
/// a block.
#[derive(Debug, Clone)]
pub struct FixedDifficultyOracle {
    block_reward: f64,
}

impl FixedDifficultyOracle {
    pub fn new(block_reward: f64) -> Self {
        FixedDifficultyOracle { block_reward }
    }
}

impl ConsensusOracle for FixedDifficultyOracle {
    fn can_mine(&mut self, miner: &MinerInfo, rng: &mut StdRng) -> bool {
        rng.gen::<f64>() < miner.mine_probability
    }

    fn can_mine_many(
        &mut self,
        miner: &MinerInfo,
        candidates: usize,
        rng: &mut StdRng,
    ) -> Vec<bool> {
        if candidates == 0 {
            return vec![];
        }

        let p = miner.mine_probability / candidates as f64;
        (0..candidates).map(|_| rng.gen::<f64>() < p).collect()
    }

    fn reward(&self, miner: &MinerInfo) -> Reward {
        Reward {
            value: self.block_reward,
            timestamp: miner.timestamp,
            miner: miner.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn miner(id: usize, timestamp: u64, mine_power: f64) -> MinerInfo {
        MinerInfo {
            id: id.into(),
            timestamp,
            mine_power,
            mine_probability: 0.0,
        }
    }

    #[test]
    fn static_win_rate_matches_power_share() {
        let mut oracle = PowOracle::new(10, 4.0, 1.0, false);
        let mut rng = StdRng::seed_from_u64(7);

        let trials = 200_000;
        let wins = (0..trials)
            .filter(|&t| oracle.can_mine(&miner(1, t + 1, 1.0), &mut rng))
            .count();

        // 1 / (10 * 4)
        let rate = wins as f64 / trials as f64;
        assert!((rate - 0.025).abs() < 0.002, "rate was {}", rate);
    }

    #[test]
    fn dynamic_total_lags_one_iteration() {
        let mut oracle = PowOracle::new(10, 100.0, 1.0, true);
        let mut rng = StdRng::seed_from_u64(0);

        oracle.can_mine(&miner(1, 1, 2.0), &mut rng);
        oracle.can_mine(&miner(2, 1, 3.0), &mut rng);
        assert_eq!(oracle.total_power(), 100.0);

        oracle.can_mine(&miner(1, 2, 2.0), &mut rng);
        assert_eq!(oracle.total_power(), 5.0);
    }

    #[test]
    fn split_attempt_has_one_draw_per_candidate() {
        let mut oracle = PowOracle::new(1, 1.0, 1.0, false);
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(oracle.can_mine_many(&miner(1, 1, 1.0), 4, &mut rng).len(), 4);
        assert!(oracle.can_mine_many(&miner(1, 2, 1.0), 0, &mut rng).is_empty());
    }

    #[test]
    fn fixed_difficulty_uses_mine_probability() {
        let mut oracle = FixedDifficultyOracle::new(5.0);
        let mut rng = StdRng::seed_from_u64(3);

        let mut certain = miner(1, 1, 0.0);
        certain.mine_probability = 1.0;
        assert!(oracle.can_mine(&certain, &mut rng));
        assert!(!oracle.can_mine(&miner(2, 1, 50.0), &mut rng));
        assert_eq!(oracle.reward(&certain).value, 5.0);
        assert_eq!(oracle.reward(&certain).miner, NodeId::from(1));
    }
}
