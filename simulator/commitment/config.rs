//! Configuration for the commitment simulator

use rand::rngs::StdRng;
use rand::SeedableRng;
use rc_rust::CommitmentConfig;

/// Configuration for commitment simulation
#[derive(Debug, Clone)]
pub struct CommitmentSimConfig {
    /// Number of simulation rounds
    pub rounds: usize,

    /// Number of open channels
    pub num_channels: usize,

    /// Redemptions attempted per channel and round
    pub redemptions_per_round: usize,

    /// Random seed (None = generate random)
    pub seed: Option<[u8; 32]>,

    /// Chain parameters
    pub commitment: CommitmentConfig,

    /// Fault injection
    pub corruption: CorruptionConfig,
}

impl Default for CommitmentSimConfig {
    fn default() -> Self {
        Self {
            rounds: 50,
            num_channels: 16,
            redemptions_per_round: 20,
            seed: None,
            commitment: CommitmentConfig {
                total_iterations: 10_000,
                block_size: 1_000,
            },
            corruption: CorruptionConfig::default(),
        }
    }
}

impl CommitmentSimConfig {
    /// Get or generate seed
    pub fn resolve_seed(&self) -> [u8; 32] {
        self.seed.unwrap_or_else(|| {
            let mut temp_rng = StdRng::from_entropy();
            let mut seed = [0u8; 32];
            use rand::RngCore;
            temp_rng.fill_bytes(&mut seed);
            seed
        })
    }
}

/// Per-round, per-channel fault probabilities
#[derive(Debug, Clone)]
pub struct CorruptionConfig {
    /// Probability of losing one stored intermediate
    pub drop_intermediate: f64,

    /// Probability of the local pointer being overwritten with garbage
    pub scramble_pointer: f64,
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        Self {
            drop_intermediate: 0.05,
            scramble_pointer: 0.01,
        }
    }
}
