//! Commitment simulation runner

use super::config::CommitmentSimConfig;
use super::stats::{ChannelRound, RedemptionStats, SimResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rc_rust::rc_interface::{ChannelEpoch, ChannelId, Hash};
use rc_rust::rc_memory_backend::{MemoryChain, MemoryStore};
use rc_rust::{ChannelCommitmentInfo, CommitmentError, CommitmentManager, NodeIdentity};
use std::sync::Arc;

const CHAIN_ID: u32 = 100;
const CONTRACT_ADDRESS: &str = "0x2a54194c8fe0e3cdeaa39c49b95495aa3b44db63";

type Manager = CommitmentManager<MemoryStore>;

/// One simulated channel with its on-chain view
#[derive(Clone)]
struct SimChannel {
    info: ChannelCommitmentInfo,
    chain: Arc<MemoryChain>,
}

/// Commitment simulation runner
pub struct CommitmentRunner {
    config: CommitmentSimConfig,
    rng: StdRng,
    seed: [u8; 32],

    manager: Arc<Manager>,
    identity: Arc<NodeIdentity>,
    channels: Vec<SimChannel>,

    // Metrics
    current_round: usize,
    stats: RedemptionStats,
    redeemed_per_channel: Vec<usize>,
}

impl CommitmentRunner {
    /// Create a runner and initialize a commitment chain for every channel
    pub async fn new(config: CommitmentSimConfig) -> Result<Self, CommitmentError> {
        let seed = config.resolve_seed();
        let mut rng = StdRng::from_seed(seed);

        let manager = Arc::new(CommitmentManager::new(
            Arc::new(MemoryStore::new()),
            config.commitment,
        )?);

        // node key derived from the simulation seed so runs are reproducible
        let identity = Arc::new(NodeIdentity::from_secret_bytes(
            *blake3::hash(&seed).as_bytes(),
        ));

        let channels: Vec<SimChannel> = (0..config.num_channels)
            .map(|_| {
                let mut id = [0u8; 32];
                rng.fill(&mut id);
                SimChannel {
                    info: ChannelCommitmentInfo::new(
                        CHAIN_ID,
                        CONTRACT_ADDRESS,
                        ChannelId(Hash::new(id)),
                        ChannelEpoch(1),
                    ),
                    chain: Arc::new(MemoryChain::new()),
                }
            })
            .collect();

        let mut handles = Vec::new();
        for channel in &channels {
            let manager = manager.clone();
            let identity = identity.clone();
            let channel = channel.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .initialize_commitment(&identity, &channel.info, channel.chain.as_ref())
                    .await
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| CommitmentError::GenerationAborted(e.to_string()))??;
        }
        log::info!("initialized {} channels", channels.len());

        let redeemed_per_channel = vec![0; channels.len()];
        Ok(Self {
            config,
            rng,
            seed,
            manager,
            identity,
            channels,
            current_round: 0,
            stats: RedemptionStats::default(),
            redeemed_per_channel,
        })
    }

    /// Run all rounds and collect the results
    pub async fn run(mut self) -> SimResult {
        for round in 0..self.config.rounds {
            self.current_round = round;
            self.inject_faults().await;
            self.run_round().await;

            if round % 10 == 0 {
                log::info!(
                    "round {}: {} redeemed, {} blocked, {} resyncs",
                    round,
                    self.stats.redeemed,
                    self.stats.blocked,
                    self.stats.resyncs
                );
            }
        }

        self.finish().await
    }

    async fn inject_faults(&mut self) {
        let corruption = self.config.corruption.clone();
        let store = self.manager.store().clone();

        for channel in &self.channels {
            let channel_id = channel.info.channel_id;

            if self.rng.gen_bool(corruption.drop_intermediate) {
                let stored = store.stored_iterations(&channel_id);
                if let Some(iteration) = stored.choose(&mut self.rng) {
                    store.remove_commitment(&channel_id, *iteration);
                    self.stats.intermediates_dropped += 1;
                    log::debug!(
                        "round {}: dropped intermediate {} of {}",
                        self.current_round,
                        iteration,
                        channel_id
                    );
                }
            }

            if self.rng.gen_bool(corruption.scramble_pointer) {
                let mut garbage = [0u8; 32];
                self.rng.fill(&mut garbage);
                if self
                    .manager
                    .bump_commitment(&channel_id, &Hash::new(garbage))
                    .await
                    .is_ok()
                {
                    self.stats.pointers_scrambled += 1;
                }
            }
        }
    }

    /// Redeem on all channels concurrently
    async fn run_round(&mut self) {
        let mut handles = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            handles.push(tokio::spawn(redeem_channel(
                self.manager.clone(),
                self.identity.clone(),
                channel.clone(),
                self.config.redemptions_per_round,
            )));
        }

        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(outcome) => {
                    self.stats.redeemed += outcome.redeemed;
                    self.stats.blocked += outcome.blocked;
                    if outcome.resynced {
                        self.stats.resyncs += 1;
                    }
                    self.redeemed_per_channel[index] += outcome.redeemed;
                }
                Err(e) => log::warn!("channel task {} failed: {}", index, e),
            }
        }
    }

    async fn finish(mut self) -> SimResult {
        for channel in &self.channels {
            self.stats.generations += self.manager.generation_count(&channel.info.channel_id).await;
        }

        let min = self.redeemed_per_channel.iter().copied().min().unwrap_or(0);
        let max = self.redeemed_per_channel.iter().copied().max().unwrap_or(0);
        let avg = if self.redeemed_per_channel.is_empty() {
            0.0
        } else {
            self.redeemed_per_channel.iter().sum::<usize>() as f64
                / self.redeemed_per_channel.len() as f64
        };
        self.stats.per_channel = (min, max, avg);

        SimResult {
            seed_used: self.seed,
            rounds_completed: self.config.rounds,
            channels: self.channels.len(),
            redemption_stats: self.stats,
        }
    }
}

/// Redeem `count` tickets on one channel, resynchronizing once if needed
async fn redeem_channel(
    manager: Arc<Manager>,
    identity: Arc<NodeIdentity>,
    channel: SimChannel,
    count: usize,
) -> ChannelRound {
    let channel_id = channel.info.channel_id;
    let mut outcome = ChannelRound::default();

    for _ in 0..count {
        let mut session = manager.redeem(&channel_id).await;
        match session.find_preimage().await {
            Ok(preimage) => {
                if let Err(e) = session.bump(&preimage).await {
                    log::warn!("bump failed on {}: {}", channel_id, e);
                    outcome.blocked += 1;
                    break;
                }
                outcome.redeemed += 1;
            }
            Err(e) if e.indicates_desync() && !outcome.resynced => {
                drop(session);
                outcome.blocked += 1;
                outcome.resynced = true;

                if let Err(e) = manager
                    .initialize_commitment(&identity, &channel.info, channel.chain.as_ref())
                    .await
                {
                    log::warn!("resync of {} failed: {}", channel_id, e);
                    break;
                }
            }
            Err(e) => {
                log::warn!("redemption on {} blocked: {}", channel_id, e);
                outcome.blocked += 1;
                break;
            }
        }
    }

    outcome
}
