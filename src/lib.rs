//! # rcRust - Relay Commitment Chains
//!
//! Commitment-chain subsystem of a relay node that gets paid through
//! probabilistic payment-channel tickets. For every channel the node
//! pre-generates a long hash chain from a secret seed, publishes only the
//! chain's head on-chain, and reveals one preimage per redeemed ticket.
//!
//! ## Core Components
//!
//! - **Seed derivation** (`rc_identity`): channel-bound seed from the node key
//! - **Hash chain** (`rc_hash_chain`): sparse chain generation and preimage recovery
//! - **CommitmentManager** (`rc_commitment`): per-channel lifecycle, resync and bumps
//! - **Backends**: in-memory store/chain doubles and an optional RocksDB store
//!
//! ## Usage with a Contract Layer
//!
//! This library is network- and chain-agnostic. You need to:
//! 1. Implement `ChainCommitment` on top of your channel contract bindings
//! 2. Pick a `CommitmentStore` (RocksDB with the `rocksdb-backend` feature)
//! 3. Call `initialize_commitment` whenever a channel is opened or reopened
//! 4. Use `redeem` to reveal a preimage and bump the commitment per ticket
//!
//! ```no_run
//! use std::sync::Arc;
//! use rc_rust::{ChannelCommitmentInfo, CommitmentConfig, CommitmentManager, NodeIdentity};
//! use rc_rust::rc_interface::{ChannelEpoch, ChannelId, Hash};
//! use rc_rust::rc_memory_backend::{MemoryChain, MemoryStore};
//!
//! # async fn run() -> Result<(), rc_rust::CommitmentError> {
//! let manager = CommitmentManager::new(Arc::new(MemoryStore::new()), CommitmentConfig::default())?;
//! let identity = NodeIdentity::new();
//! let channel = ChannelId(Hash::create(b"channel"));
//! let info = ChannelCommitmentInfo::new(100, "0xcontract", channel, ChannelEpoch(1));
//! let chain = MemoryChain::new();
//!
//! manager.initialize_commitment(&identity, &info, &chain).await?;
//!
//! // per ticket
//! let mut session = manager.redeem(&channel).await;
//! let preimage = session.find_preimage().await?;
//! // ... submit the redemption with `preimage` ...
//! session.bump(&preimage).await?;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod rc_commitment;
pub mod rc_config;
pub mod rc_errors;
pub mod rc_hash_chain;
pub mod rc_identity;
pub mod rc_interface;

// Storage backends
pub mod rc_memory_backend;

#[cfg(feature = "rocksdb-backend")]
pub mod rc_rocksdb_backend;

// Re-export commonly used types
pub use rc_commitment::{ChainState, CommitmentConfig, CommitmentManager, RedemptionSession};
pub use rc_errors::{ChainError, CommitmentError, StoreError};
pub use rc_hash_chain::{iterate_hash, recover_iterated_hash};
pub use rc_identity::{derive_commitment_seed, ChannelCommitmentInfo, CommitmentSeed, NodeIdentity};
pub use rc_interface::{
    ChainCommitment, ChannelEpoch, ChannelId, CommitmentStore, Hash, Intermediate,
    IntermediateLookup, IteratedHash,
};
