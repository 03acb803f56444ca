//! Node Identity and Commitment Seed Derivation
//!
//! This module owns the only place where the node's private key is touched by
//! the commitment subsystem:
//! - **X25519 static secret** as the node's long-term key
//! - **BLAKE3 key derivation** binding a commitment seed to one channel lifetime
//!
//! # Seed Derivation
//!
//! ```text
//! context = epoch (32 B, BE) || chain_id (4 B, BE) || channel_id (32 B) || contract_address (UTF-8)
//! seed    = BLAKE3-derive_key(SEED_CONTEXT, private_key || context)
//! ```
//!
//! Each component of the context takes part in domain separation: a new epoch,
//! a different channel, another chain or another contract deployment all lead
//! to an unrelated seed.
//!
//! ## Secret Handling
//! - `NodeIdentity` and `CommitmentSeed` never print key material in `Debug`
//! - `CommitmentSeed` is zeroized on drop
//! - Errors never carry key bytes

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::rc_errors::CommitmentError;
use crate::rc_interface::{ChannelEpoch, ChannelId, HASH_LENGTH};

/// BLAKE3 derive_key context for commitment seeds
pub const SEED_CONTEXT: &str = "relay-commitment 2023-01-01 channel commitment seed v1";

/// Width of the chain id inside the derivation context
const CHAIN_ID_WIDTH: usize = 4;

/// Node identity with an optional X25519 private key
///
/// Identities of remote peers only carry the public key; seed derivation
/// requires the local node's private key and fails with `InvalidKey` otherwise.
pub struct NodeIdentity {
    /// X25519 static secret (None for public-only identities)
    static_secret: Option<StaticSecret>,
    /// X25519 public key (derived from static secret)
    pub public_key: PublicKey,
}

// Manual Debug implementation that excludes the secret key
impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("public_key", &hex::encode(self.public_key.as_bytes()))
            .field("has_private_key", &self.static_secret.is_some())
            .finish_non_exhaustive()
    }
}

impl NodeIdentity {
    /// Create a new identity with a random X25519 keypair
    pub fn new() -> Self {
        let static_secret = StaticSecret::random_from_rng(OsRng);
        log::debug!("Generated X25519 keypair for node identity");
        Self::from_secret(static_secret)
    }

    /// Restore an identity from stored private key bytes
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(static_secret: StaticSecret) -> Self {
        let public_key = PublicKey::from(&static_secret);
        Self {
            static_secret: Some(static_secret),
            public_key,
        }
    }

    /// Identity of a peer we only know the public key of
    pub fn public_only(public_key: PublicKey) -> Self {
        Self {
            static_secret: None,
            public_key,
        }
    }

    pub fn has_private_key(&self) -> bool {
        self.static_secret.is_some()
    }

    fn private_key(&self) -> Result<&[u8; 32], CommitmentError> {
        self.static_secret
            .as_ref()
            .map(|secret| secret.as_bytes())
            .ok_or(CommitmentError::InvalidKey)
    }
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self::new()
    }
}

/// Secret root of a commitment chain
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CommitmentSeed([u8; HASH_LENGTH]);

impl CommitmentSeed {
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for CommitmentSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CommitmentSeed(<redacted>)")
    }
}

impl PartialEq for CommitmentSeed {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for CommitmentSeed {}

/// Channel context a commitment seed is bound to
///
/// Created once per channel open/reopen and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelCommitmentInfo {
    pub chain_id: u32,
    pub contract_address: String,
    pub channel_id: ChannelId,
    pub channel_epoch: ChannelEpoch,
}

impl ChannelCommitmentInfo {
    pub fn new(
        chain_id: u32,
        contract_address: impl Into<String>,
        channel_id: ChannelId,
        channel_epoch: ChannelEpoch,
    ) -> Self {
        Self {
            chain_id,
            contract_address: contract_address.into(),
            channel_id,
            channel_epoch,
        }
    }

    pub fn builder() -> ChannelCommitmentInfoBuilder {
        ChannelCommitmentInfoBuilder::default()
    }

    /// Serialized derivation context, in fixed order
    pub fn seed_context(&self) -> Vec<u8> {
        let address = self.contract_address.as_bytes();
        let mut context = Vec::with_capacity(32 + CHAIN_ID_WIDTH + HASH_LENGTH + address.len());
        context.extend_from_slice(&self.channel_epoch.serialize());
        context.extend_from_slice(&self.chain_id.to_be_bytes());
        context.extend_from_slice(self.channel_id.as_bytes());
        context.extend_from_slice(address);
        context
    }

    /// Generate the initial commitment seed for this channel from the node key
    pub fn create_initial_commitment_seed(
        &self,
        identity: &NodeIdentity,
    ) -> Result<CommitmentSeed, CommitmentError> {
        derive_commitment_seed(identity, self)
    }
}

/// Collects channel context that may arrive piecemeal (e.g. from chain events)
#[derive(Clone, Debug, Default)]
pub struct ChannelCommitmentInfoBuilder {
    chain_id: u32,
    contract_address: String,
    channel_id: Option<ChannelId>,
    channel_epoch: Option<ChannelEpoch>,
}

impl ChannelCommitmentInfoBuilder {
    pub fn chain_id(mut self, chain_id: u32) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn contract_address(mut self, address: impl Into<String>) -> Self {
        self.contract_address = address.into();
        self
    }

    pub fn channel_id(mut self, channel_id: ChannelId) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn channel_epoch(mut self, epoch: ChannelEpoch) -> Self {
        self.channel_epoch = Some(epoch);
        self
    }

    pub fn build(self) -> Result<ChannelCommitmentInfo, CommitmentError> {
        let channel_id = self
            .channel_id
            .ok_or(CommitmentError::MissingContext("channel_id"))?;
        let channel_epoch = self
            .channel_epoch
            .ok_or(CommitmentError::MissingContext("channel_epoch"))?;

        Ok(ChannelCommitmentInfo {
            chain_id: self.chain_id,
            contract_address: self.contract_address,
            channel_id,
            channel_epoch,
        })
    }
}

/// Derive the commitment seed for a channel lifetime
///
/// Pure and deterministic: identical key and context always give the same seed.
pub fn derive_commitment_seed(
    identity: &NodeIdentity,
    info: &ChannelCommitmentInfo,
) -> Result<CommitmentSeed, CommitmentError> {
    let private_key = identity.private_key()?;

    let mut hasher = blake3::Hasher::new_derive_key(SEED_CONTEXT);
    hasher.update(private_key);
    hasher.update(&info.seed_context());

    Ok(CommitmentSeed(*hasher.finalize().as_bytes()))
}
