//! Statistics and results for the commitment simulator

/// Simulation result
#[derive(Debug)]
pub struct SimResult {
    /// Seed used for the simulation
    pub seed_used: [u8; 32],

    /// Number of rounds completed
    pub rounds_completed: usize,

    /// Number of channels simulated
    pub channels: usize,

    pub redemption_stats: RedemptionStats,
}

impl SimResult {
    /// Print a summary of the simulation results
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║        Commitment Simulation Results                   ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration:");
        println!("  Seed: {}", hex::encode(self.seed_used));
        println!("  Rounds: {}", self.rounds_completed);
        println!("  Channels: {}\n", self.channels);

        let stats = &self.redemption_stats;
        println!("Redemption Statistics:");
        println!("  Successful redemptions: {}", stats.redeemed);
        println!("  Blocked redemptions: {}", stats.blocked);
        println!(
            "  Per channel: min={}, max={}, avg={:.1}",
            stats.per_channel.0, stats.per_channel.1, stats.per_channel.2
        );
        println!();

        println!("Fault Handling:");
        println!("  Intermediates dropped: {}", stats.intermediates_dropped);
        println!("  Pointers scrambled: {}", stats.pointers_scrambled);
        println!("  Resynchronizations: {}", stats.resyncs);
        println!("  Chains generated: {}", stats.generations);
        println!();
    }
}

/// Redemption statistics
#[derive(Debug, Default, Clone)]
pub struct RedemptionStats {
    pub redeemed: usize,

    /// Redemptions refused because no preimage could be found
    pub blocked: usize,

    pub resyncs: usize,

    pub generations: u64,

    pub intermediates_dropped: usize,

    pub pointers_scrambled: usize,

    /// Successful redemptions per channel (min, max, average)
    pub per_channel: (usize, usize, f64),
}

/// Outcome of one channel's work in one round
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelRound {
    pub redeemed: usize,
    pub blocked: usize,
    pub resynced: bool,
}
