// Core types and storage/on-chain interfaces for the commitment chain.
//
// Everything the orchestrator talks to lives behind the async traits below so
// that the chain logic can be driven by the in-memory backend in tests and by
// RocksDB (or any other store) in a real node.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::rc_errors::{ChainError, StoreError};

pub const HASH_LENGTH: usize = 32;

/// Number of hash iterations in a freshly generated chain
pub const TOTAL_ITERATIONS: usize = 100_000;

/// Distance between two persisted intermediates
pub const DB_ITERATION_BLOCK_SIZE: usize = 10_000;

/// Fixed-length digest used for commitments, channel ids and chain elements
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes with the chain's hash function
    pub fn create(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// One chain step: `H(self)`
    pub fn hash(&self) -> Self {
        Self::create(&self.0)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, StoreError> {
        let bytes: [u8; HASH_LENGTH] = data.try_into().map_err(|_| StoreError::Corrupted {
            reason: format!("expected {} hash bytes, got {}", HASH_LENGTH, data.len()),
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; HASH_LENGTH];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; HASH_LENGTH]> for Hash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a payment channel, immutable once the channel is opened
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub Hash);

impl ChannelId {
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        self.0.as_bytes()
    }
}

impl From<Hash> for ChannelId {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Counter bumped every time a channel is reopened after closure
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelEpoch(pub u64);

impl ChannelEpoch {
    /// 32-byte big-endian encoding (the U256 width used by channel contracts)
    pub fn serialize(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&self.0.to_be_bytes());
        out
    }
}

/// A single persisted point of a hash chain: `intermediate == H^iteration(seed)`
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Intermediate {
    pub iteration: usize,
    pub intermediate: Hash,
}

/// Result of expanding a seed into a chain
///
/// `intermediates` holds every `block_size`-th element plus the head, in
/// ascending iteration order. `hash` is the head (`H^N(seed)`).
#[derive(Clone, Debug)]
pub struct IteratedHash {
    pub intermediates: Vec<Intermediate>,
    pub hash: Hash,
}

impl IteratedHash {
    pub fn head(&self) -> Hash {
        self.hash
    }
}

///
/// Storage traits
///

/// Read access to the sparse intermediates of one chain
///
/// Recovery only ever needs this, which keeps it independent of the storage
/// engine and testable against a plain map.
#[async_trait]
pub trait IntermediateLookup: Send + Sync {
    async fn lookup(&self, iteration: usize) -> Result<Option<Hash>, StoreError>;
}

#[async_trait]
impl IntermediateLookup for BTreeMap<usize, Hash> {
    async fn lookup(&self, iteration: usize) -> Result<Option<Hash>, StoreError> {
        Ok(self.get(&iteration).copied())
    }
}

/// Persistent store for commitments and chain intermediates
///
/// Intermediates are partitioned by channel. Storing a new chain for a
/// channel replaces whatever chain was stored for it before.
#[async_trait]
pub trait CommitmentStore: Send + Sync {
    /// Stored intermediate at `iteration` for the channel, if any
    async fn get_commitment(
        &self,
        channel_id: &ChannelId,
        iteration: usize,
    ) -> Result<Option<Hash>, StoreError>;

    async fn get_current_commitment(&self, channel_id: &ChannelId)
        -> Result<Option<Hash>, StoreError>;

    async fn set_current_commitment(
        &self,
        channel_id: &ChannelId,
        commitment: &Hash,
    ) -> Result<(), StoreError>;

    /// Persist all intermediates of a chain as one batch
    async fn store_hash_intermediaries(
        &self,
        channel_id: &ChannelId,
        chain: &IteratedHash,
    ) -> Result<(), StoreError>;
}

/// Binds a store to one channel so it can serve as an `IntermediateLookup`
pub struct ChannelLookup<'a, S: CommitmentStore + ?Sized> {
    store: &'a S,
    channel_id: ChannelId,
}

impl<'a, S: CommitmentStore + ?Sized> ChannelLookup<'a, S> {
    pub fn new(store: &'a S, channel_id: ChannelId) -> Self {
        Self { store, channel_id }
    }
}

#[async_trait]
impl<'a, S: CommitmentStore + ?Sized> IntermediateLookup for ChannelLookup<'a, S> {
    async fn lookup(&self, iteration: usize) -> Result<Option<Hash>, StoreError> {
        self.store.get_commitment(&self.channel_id, iteration).await
    }
}

/// On-chain view of a single channel's commitment
///
/// Implemented by the contract bindings; the returned string of
/// `set_chain_commitment` is the transaction id/receipt.
#[async_trait]
pub trait ChainCommitment: Send + Sync {
    async fn get_chain_commitment(&self) -> Result<Option<Hash>, ChainError>;

    async fn set_chain_commitment(&self, commitment: &Hash) -> Result<String, ChainError>;
}
