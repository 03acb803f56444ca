//! Commitment Simulation Example
//!
//! Run with: cargo run --example commitment_sim

mod commitment;

use commitment::{CommitmentSimConfig, CorruptionConfig};
use log::info;
use rc_rust::CommitmentConfig;
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    println!("╔════════════════════════════════════════════════════════╗");
    println!("║        Commitment Chain Simulator                      ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    info!("Setting up commitment simulation...");

    // Configure simulation
    let config = CommitmentSimConfig {
        rounds: 100,
        num_channels: 32,
        redemptions_per_round: 25,
        seed: None, // Will be auto-generated

        commitment: CommitmentConfig {
            total_iterations: 20_000,
            block_size: 1_000,
        },

        corruption: CorruptionConfig {
            drop_intermediate: 0.05,
            scramble_pointer: 0.01,
        },
    };

    info!("Configuration:");
    info!("  Channels: {}", config.num_channels);
    info!("  Rounds: {}", config.rounds);
    info!("  Redemptions per round: {}", config.redemptions_per_round);
    info!(
        "  Chain: {} iterations, block size {}",
        config.commitment.total_iterations, config.commitment.block_size
    );
    info!("");

    info!("Starting simulation...");

    let runner = match commitment::CommitmentRunner::new(config).await {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Failed to initialize channels: {}", e);
            std::process::exit(1);
        }
    };
    let result = runner.run().await;

    // Display results
    result.print_summary();

    info!("✓ Simulation complete!");
}
