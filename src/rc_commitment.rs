//! Commitment Module
//!
//! Keeps each channel's local commitment chain in step with the commitment
//! published on-chain. A node pre-generates a hash chain per channel, publishes
//! the head, and later reveals preimages one at a time as tickets get redeemed.
//!
//! # Lifecycle
//!
//! | Local chain (index 0) | On-chain commitment | Action |
//! |---|---|---|
//! | absent  | absent  | generate and publish (`Fresh`) |
//! | present | present | verify a preimage is recoverable, else regenerate |
//! | otherwise |       | regenerate and publish (`Desynced`) |
//!
//! Regeneration derives the same seed as before (absent an epoch change) and
//! rebuilds the chain from it. Any payment progress on the old chain is reset;
//! coordinating that with the channel's on-chain epoch is left to the caller.
//!
//! # Concurrency
//!
//! Every operation on a channel runs under that channel's lock. Different
//! channels never wait on each other.

use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::rc_errors::CommitmentError;
use crate::rc_hash_chain::{iterate_hash, recover_iterated_hash};
use crate::rc_identity::{
    derive_commitment_seed, ChannelCommitmentInfo, CommitmentSeed, NodeIdentity,
};
use crate::rc_interface::{
    ChainCommitment, ChannelId, ChannelLookup, CommitmentStore, Hash, Intermediate, IteratedHash,
    DB_ITERATION_BLOCK_SIZE, TOTAL_ITERATIONS,
};

/// Configuration for commitment chain generation and search
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CommitmentConfig {
    /// Length of a freshly generated chain
    pub total_iterations: usize,

    /// Distance between persisted intermediates
    pub block_size: usize,
}

impl Default for CommitmentConfig {
    fn default() -> Self {
        Self {
            total_iterations: TOTAL_ITERATIONS,
            block_size: DB_ITERATION_BLOCK_SIZE,
        }
    }
}

impl CommitmentConfig {
    pub fn validate(&self) -> Result<(), CommitmentError> {
        if self.block_size == 0 {
            return Err(CommitmentError::InvalidConfig("block_size must be positive".into()));
        }
        if self.total_iterations == 0 {
            return Err(CommitmentError::InvalidConfig(
                "total_iterations must be positive".into(),
            ));
        }
        if self.block_size > self.total_iterations {
            return Err(CommitmentError::InvalidConfig(format!(
                "block_size {} exceeds total_iterations {}",
                self.block_size, self.total_iterations
            )));
        }
        Ok(())
    }

    /// Number of intermediates a generated chain persists (boundaries + head)
    pub fn stored_points(&self) -> usize {
        let boundaries = (self.total_iterations + self.block_size - 1) / self.block_size;
        boundaries + 1
    }
}

/// Outcome of comparing local and on-chain state for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Nothing stored locally and nothing published
    Fresh,
    /// Both sides have a commitment; still needs a recoverable preimage
    ApparentlySynced,
    /// Only one side has a commitment
    Desynced,
}

impl ChainState {
    pub fn evaluate(db_contains_chain: bool, chain_commitment: Option<&Hash>) -> Self {
        match (db_contains_chain, chain_commitment.is_some()) {
            (false, false) => ChainState::Fresh,
            (true, true) => ChainState::ApparentlySynced,
            _ => ChainState::Desynced,
        }
    }
}

/// Per-channel state owned by the manager
#[derive(Debug, Default)]
pub struct ChannelContext {
    /// Boundary where the last preimage was found; searched first next time
    pub last_boundary: Option<usize>,
    /// Number of chains generated for this channel by this manager
    pub generations: u64,
    /// Number of commitment bumps recorded
    pub bumps: u64,
}

/// Orchestrates commitment chains of all channels of a node
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use rc_rust::rc_commitment::{CommitmentConfig, CommitmentManager};
/// use rc_rust::rc_identity::{ChannelCommitmentInfo, NodeIdentity};
/// use rc_rust::rc_interface::{ChannelEpoch, ChannelId, Hash};
/// use rc_rust::rc_memory_backend::{MemoryChain, MemoryStore};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let config = CommitmentConfig { total_iterations: 1000, block_size: 100 };
/// let manager = CommitmentManager::new(Arc::new(MemoryStore::new()), config)?;
///
/// let identity = NodeIdentity::new();
/// let channel = ChannelId(Hash::create(b"channel"));
/// let info = ChannelCommitmentInfo::new(100, "0xcontract", channel, ChannelEpoch(1));
/// let chain = MemoryChain::new();
///
/// manager.initialize_commitment(&identity, &info, &chain).await?;
///
/// let preimage = manager.find_commitment_preimage(&channel).await?;
/// assert_eq!(Some(preimage.hash()), chain.commitment());
/// # Ok::<(), rc_rust::rc_errors::CommitmentError>(())
/// # }).unwrap();
/// ```
pub struct CommitmentManager<S: CommitmentStore> {
    store: Arc<S>,
    config: CommitmentConfig,
    channels: Mutex<HashMap<ChannelId, Arc<AsyncMutex<ChannelContext>>>>,
}

impl<S: CommitmentStore> CommitmentManager<S> {
    pub fn new(store: Arc<S>, config: CommitmentConfig) -> Result<Self, CommitmentError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &CommitmentConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Context handle of a channel, created on first use
    fn channel(&self, channel_id: &ChannelId) -> Arc<AsyncMutex<ChannelContext>> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.entry(*channel_id).or_default().clone()
    }

    /// Context handle of a channel the manager already tracks
    fn tracked_channel(&self, channel_id: &ChannelId) -> Option<Arc<AsyncMutex<ChannelContext>>> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(channel_id).cloned()
    }

    async fn lock_channel(&self, channel_id: &ChannelId) -> OwnedMutexGuard<ChannelContext> {
        self.channel(channel_id).lock_owned().await
    }

    /// Number of channels with in-memory state
    pub fn tracked_channels(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop the in-memory state of a channel that is closed for good
    ///
    /// Waits for an operation in flight on the channel to finish. Stored
    /// intermediates and pointers are left to the store. Returns `false` for
    /// channels the manager does not track.
    pub async fn forget_channel(&self, channel_id: &ChannelId) -> bool {
        let removed = {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels.remove(channel_id)
        };
        match removed {
            Some(context) => {
                drop(context.lock().await);
                log::debug!("forgot channel {}", channel_id);
                true
            }
            None => false,
        }
    }

    /// Make sure the channel has a usable commitment chain
    ///
    /// Called whenever a channel is opened or reopened, and after a failed
    /// recovery. A channel that is already healthy is left untouched.
    pub async fn initialize_commitment<C>(
        &self,
        identity: &NodeIdentity,
        info: &ChannelCommitmentInfo,
        chain: &C,
    ) -> Result<(), CommitmentError>
    where
        C: ChainCommitment + ?Sized,
    {
        let mut context = self.lock_channel(&info.channel_id).await;
        let channel_id = info.channel_id;

        let state = self.evaluate_state(&channel_id, chain).await?;

        if state == ChainState::ApparentlySynced {
            match self.find_preimage_locked(&channel_id, &mut context).await {
                Ok(_) => {
                    log::debug!("commitment chain of channel {} is healthy", channel_id);
                    return Ok(());
                }
                Err(e) if e.indicates_desync() => {
                    log::warn!(
                        "secret is found but failed to find preimage, reinitializing: {}",
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        log::info!("reinitializing commitment chain of channel {} ({:?})", channel_id, state);
        self.create_commitment_chain(identity, info, chain, &mut context).await
    }

    /// Compare local and on-chain state of a channel without changing either
    pub async fn evaluate_state<C>(
        &self,
        channel_id: &ChannelId,
        chain: &C,
    ) -> Result<ChainState, CommitmentError>
    where
        C: ChainCommitment + ?Sized,
    {
        let db_contains_chain = self.store.get_commitment(channel_id, 0).await?.is_some();
        let chain_commitment = chain.get_chain_commitment().await?;

        Ok(ChainState::evaluate(db_contains_chain, chain_commitment.as_ref()))
    }

    async fn create_commitment_chain<C>(
        &self,
        identity: &NodeIdentity,
        info: &ChannelCommitmentInfo,
        chain: &C,
        context: &mut ChannelContext,
    ) -> Result<(), CommitmentError>
    where
        C: ChainCommitment + ?Sized,
    {
        let seed = derive_commitment_seed(identity, info)?;
        let iterated = self.generate_chain(seed).await?;
        let head = iterated.head();

        self.store
            .store_hash_intermediaries(&info.channel_id, &iterated)
            .await?;

        // local pointer only moves once the head is accepted on-chain
        let tx = chain.set_chain_commitment(&head).await?;
        self.store.set_current_commitment(&info.channel_id, &head).await?;

        context.last_boundary = None;
        context.generations += 1;

        log::info!(
            "commitment chain of channel {} initialized, head {} published in {}",
            info.channel_id,
            head,
            tx
        );
        Ok(())
    }

    /// Expand a seed on a blocking worker so other channels keep progressing
    async fn generate_chain(&self, seed: CommitmentSeed) -> Result<IteratedHash, CommitmentError> {
        let CommitmentConfig {
            total_iterations,
            block_size,
        } = self.config;

        // the seed moves into the worker and is zeroized when it is dropped there
        tokio::task::spawn_blocking(move || iterate_hash(seed.as_bytes(), total_iterations, block_size))
            .await
            .map_err(|e| CommitmentError::GenerationAborted(e.to_string()))
    }

    /// Preimage of the channel's current commitment
    ///
    /// Fails when the store has no current commitment or when no stored
    /// intermediate leads to it. Either failure blocks redemption until the
    /// channel is re-initialized.
    pub async fn find_commitment_preimage(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Hash, CommitmentError> {
        let mut context = self.lock_channel(channel_id).await;
        self.find_preimage_locked(channel_id, &mut context)
            .await
            .map(|found| found.intermediate)
    }

    async fn find_preimage_locked(
        &self,
        channel_id: &ChannelId,
        context: &mut ChannelContext,
    ) -> Result<Intermediate, CommitmentError> {
        let current = self
            .store
            .get_current_commitment(channel_id)
            .await?
            .ok_or(CommitmentError::NoCurrentCommitment(*channel_id))?;

        let lookup = ChannelLookup::new(self.store.as_ref(), *channel_id);
        let found = recover_iterated_hash(
            &current,
            &lookup,
            self.config.total_iterations,
            self.config.block_size,
            context.last_boundary,
        )
        .await?;

        match found {
            Some(intermediate) => {
                let boundary = intermediate.iteration - intermediate.iteration % self.config.block_size;
                context.last_boundary = Some(boundary);
                Ok(intermediate)
            }
            None => {
                log::warn!(
                    "could not find preimage of {} for channel {}",
                    current,
                    channel_id
                );
                Err(CommitmentError::PreimageNotFound {
                    channel_id: *channel_id,
                    commitment: current,
                })
            }
        }
    }

    /// Record that `new_commitment` (the revealed preimage) is now current
    ///
    /// Local only; the on-chain commitment moves as part of the redemption
    /// transaction itself.
    pub async fn bump_commitment(
        &self,
        channel_id: &ChannelId,
        new_commitment: &Hash,
    ) -> Result<(), CommitmentError> {
        let mut context = self.lock_channel(channel_id).await;
        self.bump_locked(channel_id, new_commitment, &mut context).await
    }

    async fn bump_locked(
        &self,
        channel_id: &ChannelId,
        new_commitment: &Hash,
        context: &mut ChannelContext,
    ) -> Result<(), CommitmentError> {
        self.store
            .set_current_commitment(channel_id, new_commitment)
            .await?;
        context.bumps += 1;
        log::debug!("channel {} commitment bumped to {}", channel_id, new_commitment);
        Ok(())
    }

    /// Start an exclusive redemption on a channel
    ///
    /// The returned session holds the channel lock until dropped, so the
    /// preimage lookup and the following bump cannot interleave with another
    /// redemption or a lifecycle evaluation of the same channel.
    pub async fn redeem(&self, channel_id: &ChannelId) -> RedemptionSession<'_, S> {
        RedemptionSession {
            manager: self,
            channel_id: *channel_id,
            context: self.lock_channel(channel_id).await,
        }
    }

    /// Number of bumps recorded for a channel (0 for unknown channels)
    pub async fn bump_count(&self, channel_id: &ChannelId) -> u64 {
        match self.tracked_channel(channel_id) {
            Some(context) => context.lock().await.bumps,
            None => 0,
        }
    }

    /// Number of chains generated for a channel by this manager
    pub async fn generation_count(&self, channel_id: &ChannelId) -> u64 {
        match self.tracked_channel(channel_id) {
            Some(context) => context.lock().await.generations,
            None => 0,
        }
    }
}

/// Exclusive access to one channel for a single ticket redemption
pub struct RedemptionSession<'a, S: CommitmentStore> {
    manager: &'a CommitmentManager<S>,
    channel_id: ChannelId,
    context: OwnedMutexGuard<ChannelContext>,
}

impl<'a, S: CommitmentStore> RedemptionSession<'a, S> {
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Preimage to reveal for the next ticket
    pub async fn find_preimage(&mut self) -> Result<Hash, CommitmentError> {
        self.manager
            .find_preimage_locked(&self.channel_id, &mut self.context)
            .await
            .map(|found| found.intermediate)
    }

    /// Advance the channel to the revealed preimage and end the session
    pub async fn bump(mut self, new_commitment: &Hash) -> Result<(), CommitmentError> {
        self.manager
            .bump_locked(&self.channel_id, new_commitment, &mut self.context)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rc_errors::{ChainError, StoreError};
    use crate::rc_interface::ChannelEpoch;
    use crate::rc_memory_backend::{MemoryChain, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn small_config() -> CommitmentConfig {
        CommitmentConfig {
            total_iterations: 1000,
            block_size: 100,
        }
    }

    fn info(name: &[u8]) -> ChannelCommitmentInfo {
        ChannelCommitmentInfo::new(
            100,
            "0x2a54194c8fe0e3cdeaa39c49b95495aa3b44db63",
            ChannelId(Hash::create(name)),
            ChannelEpoch(1),
        )
    }

    fn nth(seed: &[u8; 32], n: usize) -> Hash {
        (0..n).fold(Hash::new(*seed), |h, _| h.hash())
    }

    fn manager(config: CommitmentConfig) -> CommitmentManager<MemoryStore> {
        CommitmentManager::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(CommitmentConfig::default().validate().is_ok());
        assert_eq!(CommitmentConfig::default().stored_points(), 11);

        let zero_block = CommitmentConfig {
            total_iterations: 10,
            block_size: 0,
        };
        assert!(matches!(
            zero_block.validate(),
            Err(CommitmentError::InvalidConfig(_))
        ));

        let oversized = CommitmentConfig {
            total_iterations: 10,
            block_size: 11,
        };
        assert!(oversized.validate().is_err());

        let uneven = CommitmentConfig {
            total_iterations: 250,
            block_size: 100,
        };
        assert_eq!(uneven.stored_points(), 4);
    }

    #[test]
    fn test_chain_state_table() {
        let h = Hash::create(b"h");
        assert_eq!(ChainState::evaluate(false, None), ChainState::Fresh);
        assert_eq!(ChainState::evaluate(true, Some(&h)), ChainState::ApparentlySynced);
        assert_eq!(ChainState::evaluate(true, None), ChainState::Desynced);
        assert_eq!(ChainState::evaluate(false, Some(&h)), ChainState::Desynced);
    }

    #[tokio::test]
    async fn test_fresh_channel_generates_and_publishes() {
        let manager = manager(small_config());
        let identity = NodeIdentity::from_secret_bytes([1u8; 32]);
        let info = info(b"fresh");
        let chain = MemoryChain::new();

        assert_eq!(
            manager.evaluate_state(&info.channel_id, &chain).await.unwrap(),
            ChainState::Fresh
        );

        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();

        let seed = derive_commitment_seed(&identity, &info).unwrap();
        let head = nth(seed.as_bytes(), 1000);
        assert_eq!(chain.commitment(), Some(head));
        assert_eq!(
            manager.store().get_current_commitment(&info.channel_id).await.unwrap(),
            Some(head)
        );
        assert_eq!(
            manager.store().stored_iterations(&info.channel_id),
            (0..=1000).step_by(100).collect::<Vec<_>>()
        );
        assert_eq!(manager.generation_count(&info.channel_id).await, 1);
    }

    #[tokio::test]
    async fn test_initialize_twice_is_a_no_op() {
        let manager = manager(small_config());
        let identity = NodeIdentity::from_secret_bytes([2u8; 32]);
        let info = info(b"idempotent");
        let chain = MemoryChain::new();

        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();
        let on_chain = chain.commitment();
        let local = manager.store().get_current_commitment(&info.channel_id).await.unwrap();

        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();

        assert_eq!(chain.commitment(), on_chain);
        assert_eq!(chain.set_calls(), 1);
        assert_eq!(
            manager.store().get_current_commitment(&info.channel_id).await.unwrap(),
            local
        );
        assert_eq!(manager.generation_count(&info.channel_id).await, 1);
    }

    #[tokio::test]
    async fn test_concrete_scenario_with_default_parameters() {
        let manager = manager(CommitmentConfig::default());
        let identity = NodeIdentity::from_secret_bytes([3u8; 32]);
        let info = info(b"default parameters");
        let chain = MemoryChain::new();

        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();

        let seed = derive_commitment_seed(&identity, &info).unwrap();
        let stored = manager.store().stored_iterations(&info.channel_id);
        assert_eq!(stored.len(), 11);
        assert_eq!(stored, (0..=100_000).step_by(10_000).collect::<Vec<_>>());

        let h_99998 = nth(seed.as_bytes(), 99_998);
        let h_99999 = h_99998.hash();
        let h_100000 = h_99999.hash();
        assert_eq!(chain.commitment(), Some(h_100000));

        let preimage = manager.find_commitment_preimage(&info.channel_id).await.unwrap();
        assert_eq!(preimage, h_99999);

        manager.bump_commitment(&info.channel_id, &h_99999).await.unwrap();
        let next = manager.find_commitment_preimage(&info.channel_id).await.unwrap();
        assert_eq!(next, h_99998);
        assert_eq!(manager.bump_count(&info.channel_id).await, 1);
    }

    #[tokio::test]
    async fn test_redemption_sequence_walks_down_the_chain() {
        let manager = manager(small_config());
        let identity = NodeIdentity::from_secret_bytes([4u8; 32]);
        let info = info(b"walk");
        let chain = MemoryChain::new();
        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();

        let seed = derive_commitment_seed(&identity, &info).unwrap();

        // cross at least two block boundaries
        for position in (750..1000).rev() {
            let mut session = manager.redeem(&info.channel_id).await;
            let preimage = session.find_preimage().await.unwrap();
            assert_eq!(preimage, nth(seed.as_bytes(), position));
            session.bump(&preimage).await.unwrap();
        }
        assert_eq!(manager.bump_count(&info.channel_id).await, 250);
    }

    #[tokio::test]
    async fn test_corrupted_root_still_recovers_from_later_boundary() {
        let manager = manager(small_config());
        let identity = NodeIdentity::from_secret_bytes([5u8; 32]);
        let info = info(b"corrupted root");
        let chain = MemoryChain::new();
        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();

        let seed = derive_commitment_seed(&identity, &info).unwrap();
        assert!(manager.store().remove_commitment(&info.channel_id, 0).is_some());

        let preimage = manager.find_commitment_preimage(&info.channel_id).await.unwrap();
        assert_eq!(preimage, nth(seed.as_bytes(), 999));
        assert_eq!(chain.commitment(), Some(preimage.hash()));
    }

    #[tokio::test]
    async fn test_unrecoverable_commitment_triggers_regeneration() {
        let manager = manager(small_config());
        let identity = NodeIdentity::from_secret_bytes([6u8; 32]);
        let info = info(b"desync");
        let chain = MemoryChain::new();
        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();

        // local pointer moved somewhere off the chain
        let bogus = Hash::create(b"bogus");
        manager.bump_commitment(&info.channel_id, &bogus).await.unwrap();
        assert!(matches!(
            manager.find_commitment_preimage(&info.channel_id).await,
            Err(CommitmentError::PreimageNotFound { .. })
        ));

        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();

        assert_eq!(chain.set_calls(), 2);
        assert_eq!(manager.generation_count(&info.channel_id).await, 2);
        let preimage = manager.find_commitment_preimage(&info.channel_id).await.unwrap();
        assert_eq!(chain.commitment(), Some(preimage.hash()));
    }

    #[tokio::test]
    async fn test_missing_on_chain_commitment_regenerates() {
        let manager = manager(small_config());
        let identity = NodeIdentity::from_secret_bytes([7u8; 32]);
        let info = info(b"chain reset");

        manager
            .initialize_commitment(&identity, &info, &MemoryChain::new())
            .await
            .unwrap();

        // a fresh contract view without any commitment
        let empty_chain = MemoryChain::new();
        assert_eq!(
            manager.evaluate_state(&info.channel_id, &empty_chain).await.unwrap(),
            ChainState::Desynced
        );
        manager.initialize_commitment(&identity, &info, &empty_chain).await.unwrap();
        assert_eq!(empty_chain.set_calls(), 1);
        assert!(empty_chain.commitment().is_some());
    }

    #[tokio::test]
    async fn test_rejected_publication_leaves_pointer_untouched() {
        let manager = manager(small_config());
        let identity = NodeIdentity::from_secret_bytes([8u8; 32]);
        let info = info(b"rejected");
        let chain = MemoryChain::new();
        chain.set_reject_writes(true);

        let result = manager.initialize_commitment(&identity, &info, &chain).await;
        assert!(matches!(result, Err(CommitmentError::ChainPublish(_))));
        assert_eq!(
            manager.store().get_current_commitment(&info.channel_id).await.unwrap(),
            None
        );
        assert!(matches!(
            manager.find_commitment_preimage(&info.channel_id).await,
            Err(CommitmentError::NoCurrentCommitment(_))
        ));

        // next attempt starts over and succeeds
        chain.set_reject_writes(false);
        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();
        let preimage = manager.find_commitment_preimage(&info.channel_id).await.unwrap();
        assert_eq!(chain.commitment(), Some(preimage.hash()));
    }

    #[tokio::test]
    async fn test_public_only_identity_cannot_initialize() {
        let manager = manager(small_config());
        let identity = NodeIdentity::public_only(NodeIdentity::new().public_key);
        let chain = MemoryChain::new();

        let result = manager
            .initialize_commitment(&identity, &info(b"no key"), &chain)
            .await;
        assert!(matches!(result, Err(CommitmentError::InvalidKey)));
        assert_eq!(chain.set_calls(), 0);
    }

    /// Store whose writes can be switched off
    struct FailingStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl CommitmentStore for FailingStore {
        async fn get_commitment(
            &self,
            channel_id: &ChannelId,
            iteration: usize,
        ) -> Result<Option<Hash>, StoreError> {
            self.inner.get_commitment(channel_id, iteration).await
        }

        async fn get_current_commitment(
            &self,
            channel_id: &ChannelId,
        ) -> Result<Option<Hash>, StoreError> {
            self.inner.get_current_commitment(channel_id).await
        }

        async fn set_current_commitment(
            &self,
            channel_id: &ChannelId,
            commitment: &Hash,
        ) -> Result<(), StoreError> {
            self.inner.set_current_commitment(channel_id, commitment).await
        }

        async fn store_hash_intermediaries(
            &self,
            channel_id: &ChannelId,
            chain: &IteratedHash,
        ) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.inner.store_hash_intermediaries(channel_id, chain).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_surfaced_before_publication() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            fail_writes: AtomicBool::new(true),
        });
        let manager = CommitmentManager::new(store, small_config()).unwrap();
        let identity = NodeIdentity::from_secret_bytes([9u8; 32]);
        let chain = MemoryChain::new();

        let result = manager
            .initialize_commitment(&identity, &info(b"store failure"), &chain)
            .await;
        assert!(matches!(result, Err(CommitmentError::Store(_))));
        assert_eq!(chain.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_redemptions_on_one_channel_are_serialized() {
        let manager = Arc::new(manager(small_config()));
        let identity = NodeIdentity::from_secret_bytes([10u8; 32]);
        let info = info(b"concurrent");
        let chain = MemoryChain::new();
        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            let channel_id = info.channel_id;
            handles.push(tokio::spawn(async move {
                let mut session = manager.redeem(&channel_id).await;
                let preimage = session.find_preimage().await.unwrap();
                session.bump(&preimage).await.unwrap();
                preimage
            }));
        }

        let mut revealed = std::collections::HashSet::new();
        for handle in handles {
            assert!(revealed.insert(handle.await.unwrap()));
        }

        // twenty distinct steps down from the head
        let seed = derive_commitment_seed(&identity, &info).unwrap();
        let expected = nth(seed.as_bytes(), 980);
        assert_eq!(
            manager.store().get_current_commitment(&info.channel_id).await.unwrap(),
            Some(expected)
        );
    }

    #[tokio::test]
    async fn test_channels_progress_independently() {
        let manager = manager(small_config());
        let identity = NodeIdentity::from_secret_bytes([11u8; 32]);
        let a = info(b"channel a");
        let b = info(b"channel b");
        let chain_a = MemoryChain::new();
        let chain_b = MemoryChain::new();

        let (ra, rb) = tokio::join!(
            manager.initialize_commitment(&identity, &a, &chain_a),
            manager.initialize_commitment(&identity, &b, &chain_b)
        );
        ra.unwrap();
        rb.unwrap();
        assert_ne!(chain_a.commitment(), chain_b.commitment());

        // holding a session on one channel does not block the other
        let _session = manager.redeem(&a.channel_id).await;
        let preimage = manager.find_commitment_preimage(&b.channel_id).await.unwrap();
        assert_eq!(chain_b.commitment(), Some(preimage.hash()));
    }

    /// Chain whose first publication parks until released
    struct GatedChain {
        inner: MemoryChain,
        gated: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedChain {
        fn new() -> Self {
            Self {
                inner: MemoryChain::new(),
                gated: AtomicBool::new(true),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl ChainCommitment for GatedChain {
        async fn get_chain_commitment(&self) -> Result<Option<Hash>, ChainError> {
            self.inner.get_chain_commitment().await
        }

        async fn set_chain_commitment(&self, commitment: &Hash) -> Result<String, ChainError> {
            if self.gated.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.set_chain_commitment(commitment).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initializations_generate_once() {
        let manager = Arc::new(manager(small_config()));
        let identity = Arc::new(NodeIdentity::from_secret_bytes([12u8; 32]));
        let info = info(b"concurrent init");
        let chain = Arc::new(GatedChain::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let identity = identity.clone();
            let info = info.clone();
            let chain = chain.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .initialize_commitment(&identity, &info, chain.as_ref())
                    .await
            }));
        }

        // one initialization is publishing and holds the channel
        chain.entered.notified().await;
        let redemption = {
            let manager = manager.clone();
            let channel_id = info.channel_id;
            tokio::spawn(async move {
                let mut session = manager.redeem(&channel_id).await;
                let preimage = session.find_preimage().await;
                preimage
            })
        };
        chain.release.notify_one();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let preimage = redemption.await.unwrap().unwrap();

        assert_eq!(chain.inner.set_calls(), 1);
        assert_eq!(manager.generation_count(&info.channel_id).await, 1);
        assert_eq!(chain.inner.commitment(), Some(preimage.hash()));
    }

    #[tokio::test]
    async fn test_cancelled_initialization_leaves_no_pointer() {
        let manager = manager(CommitmentConfig::default());
        let identity = NodeIdentity::from_secret_bytes([13u8; 32]);
        let info = info(b"cancelled");
        let chain = MemoryChain::new();

        // dropped while the chain is still being generated
        let attempt = tokio::time::timeout(
            Duration::from_micros(50),
            manager.initialize_commitment(&identity, &info, &chain),
        )
        .await;
        assert!(attempt.is_err());
        assert_eq!(chain.commitment(), None);
        assert_eq!(
            manager.store().get_current_commitment(&info.channel_id).await.unwrap(),
            None
        );

        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();
        let preimage = manager.find_commitment_preimage(&info.channel_id).await.unwrap();
        assert_eq!(chain.commitment(), Some(preimage.hash()));
        assert_eq!(chain.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_counters_do_not_track_unknown_channels() {
        let manager = manager(small_config());
        let unknown = ChannelId(Hash::create(b"never opened"));

        assert_eq!(manager.bump_count(&unknown).await, 0);
        assert_eq!(manager.generation_count(&unknown).await, 0);
        assert_eq!(manager.tracked_channels(), 0);
        assert!(!manager.forget_channel(&unknown).await);
    }

    #[tokio::test]
    async fn test_forget_channel_drops_in_memory_state() {
        let manager = manager(small_config());
        let identity = NodeIdentity::from_secret_bytes([14u8; 32]);
        let info = info(b"closed");
        let chain = MemoryChain::new();

        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();
        let preimage = manager.find_commitment_preimage(&info.channel_id).await.unwrap();
        manager.bump_commitment(&info.channel_id, &preimage).await.unwrap();
        assert_eq!(manager.tracked_channels(), 1);

        assert!(manager.forget_channel(&info.channel_id).await);
        assert_eq!(manager.tracked_channels(), 0);
        assert_eq!(manager.bump_count(&info.channel_id).await, 0);

        // the stored chain is untouched and picked up again on reopen
        manager.initialize_commitment(&identity, &info, &chain).await.unwrap();
        assert_eq!(chain.set_calls(), 1);
        let next = manager.find_commitment_preimage(&info.channel_id).await.unwrap();
        assert_eq!(next.hash(), preimage);
    }
}
