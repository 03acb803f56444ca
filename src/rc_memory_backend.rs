// In-memory storage backend for commitments and chain intermediates
//
// This module provides simple, fast in-memory implementations of the store
// and of the on-chain commitment interface. Ideal for testing, simulation,
// and development.
//
// For persistent storage, see rc_rocksdb_backend.rs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use hashbrown::HashMap;

use crate::rc_errors::{ChainError, StoreError};
use crate::rc_interface::{ChainCommitment, ChannelId, CommitmentStore, Hash, IteratedHash};

// ============================================================================
// In-Memory Commitment Store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    intermediates: HashMap<ChannelId, BTreeMap<usize, Hash>>,
    current: HashMap<ChannelId, Hash>,
}

/// In-memory commitment store
///
/// All channels share one map guarded by a mutex; the lock is only held for
/// the duration of a single map operation, never across an await point.
///
/// # Example
/// ```rust
/// use rc_rust::rc_memory_backend::MemoryStore;
/// use rc_rust::rc_interface::{ChannelId, CommitmentStore, Hash};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// let channel = ChannelId(Hash::create(b"channel"));
///
/// store.set_current_commitment(&channel, &Hash::create(b"head")).await?;
/// assert_eq!(store.get_current_commitment(&channel).await?, Some(Hash::create(b"head")));
/// # Ok::<(), rc_rust::rc_errors::StoreError>(())
/// # }).unwrap();
/// ```
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    /// Drop a stored intermediate (used to simulate store corruption)
    pub fn remove_commitment(&self, channel_id: &ChannelId, iteration: usize) -> Option<Hash> {
        self.state
            .lock()
            .ok()?
            .intermediates
            .get_mut(channel_id)
            .and_then(|chain| chain.remove(&iteration))
    }

    /// Iterations of all intermediates stored for a channel, ascending
    pub fn stored_iterations(&self, channel_id: &ChannelId) -> Vec<usize> {
        self.state
            .lock()
            .map(|state| {
                state
                    .intermediates
                    .get(channel_id)
                    .map(|chain| chain.keys().copied().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Number of channels with a stored chain
    pub fn channel_count(&self) -> usize {
        self.state.lock().map(|s| s.intermediates.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CommitmentStore for MemoryStore {
    async fn get_commitment(
        &self,
        channel_id: &ChannelId,
        iteration: usize,
    ) -> Result<Option<Hash>, StoreError> {
        Ok(self
            .state()?
            .intermediates
            .get(channel_id)
            .and_then(|chain| chain.get(&iteration).copied()))
    }

    async fn get_current_commitment(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<Hash>, StoreError> {
        Ok(self.state()?.current.get(channel_id).copied())
    }

    async fn set_current_commitment(
        &self,
        channel_id: &ChannelId,
        commitment: &Hash,
    ) -> Result<(), StoreError> {
        self.state()?.current.insert(*channel_id, *commitment);
        Ok(())
    }

    async fn store_hash_intermediaries(
        &self,
        channel_id: &ChannelId,
        chain: &IteratedHash,
    ) -> Result<(), StoreError> {
        let points: BTreeMap<usize, Hash> = chain
            .intermediates
            .iter()
            .map(|i| (i.iteration, i.intermediate))
            .collect();

        // replace the whole chain in one step
        self.state()?.intermediates.insert(*channel_id, points);
        Ok(())
    }
}

// ============================================================================
// In-Memory On-Chain Commitment
// ============================================================================

/// Stand-in for a channel's on-chain commitment field
///
/// Counts writes and can be switched into a rejecting mode to exercise the
/// failure paths of chain publication.
#[derive(Default)]
pub struct MemoryChain {
    commitment: Mutex<Option<Hash>>,
    set_calls: AtomicUsize,
    reject_writes: AtomicBool,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain that already carries a commitment
    pub fn with_commitment(commitment: Hash) -> Self {
        Self {
            commitment: Mutex::new(Some(commitment)),
            ..Self::default()
        }
    }

    pub fn commitment(&self) -> Option<Hash> {
        self.commitment.lock().ok().and_then(|c| *c)
    }

    /// Number of accepted and rejected `set_chain_commitment` calls
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainCommitment for MemoryChain {
    async fn get_chain_commitment(&self) -> Result<Option<Hash>, ChainError> {
        self.commitment
            .lock()
            .map(|c| *c)
            .map_err(|_| ChainError::Unavailable("memory chain lock poisoned".into()))
    }

    async fn set_chain_commitment(&self, commitment: &Hash) -> Result<String, ChainError> {
        let call = self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(ChainError::Rejected("writes disabled".into()));
        }

        let mut current = self
            .commitment
            .lock()
            .map_err(|_| ChainError::Unavailable("memory chain lock poisoned".into()))?;
        *current = Some(*commitment);

        Ok(format!("mem-tx-{}", call))
    }
}
