use thiserror::Error;

use crate::rc_interface::{ChannelId, Hash};

/// Failures of the persistent commitment store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("corrupted store entry: {reason}")]
    Corrupted { reason: String },
}

/// Failures reported by the on-chain commitment interface
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("on-chain commitment update rejected: {0}")]
    Rejected(String),

    #[error("on-chain state unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum CommitmentError {
    #[error("node identity has no private key")]
    InvalidKey,

    #[error("missing channel context: {0}")]
    MissingContext(&'static str),

    #[error("could not find preimage of {commitment} for channel {channel_id}")]
    PreimageNotFound { channel_id: ChannelId, commitment: Hash },

    #[error("no current commitment stored for channel {0}")]
    NoCurrentCommitment(ChannelId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to publish commitment: {0}")]
    ChainPublish(#[from] ChainError),

    #[error("invalid commitment configuration: {0}")]
    InvalidConfig(String),

    #[error("chain generation did not complete: {0}")]
    GenerationAborted(String),
}

impl CommitmentError {
    /// Errors after which the orchestrator falls back to regenerating the chain
    pub fn indicates_desync(&self) -> bool {
        matches!(
            self,
            CommitmentError::PreimageNotFound { .. } | CommitmentError::NoCurrentCommitment(_)
        )
    }
}
