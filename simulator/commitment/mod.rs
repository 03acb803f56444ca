//! Commitment simulator module
//!
//! Drives many channels of one node through rounds of ticket redemptions
//! while injecting store corruption, to exercise:
//! - Concurrent redemptions on independent channels
//! - Recovery from missing intermediates
//! - Resynchronization after the local pointer drifts off the chain

pub mod config;
pub mod runner;
pub mod stats;

pub use config::{CommitmentSimConfig, CorruptionConfig};
pub use runner::CommitmentRunner;
pub use stats::{RedemptionStats, SimResult};
