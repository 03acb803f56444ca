// Commitment node demo
//
// Usage:
//   cargo run                      (defaults, in-memory store)
//   cargo run -- node.yaml         (config from YAML)
//   cargo run --features rocksdb-backend -- node.yaml   (db_path honoured)

use std::env;
use std::sync::Arc;

use log::info;
use simple_logger::SimpleLogger;

use rc_rust::rc_config::NodeConfig;
use rc_rust::rc_interface::{ChannelEpoch, ChannelId, CommitmentStore, Hash};
use rc_rust::rc_memory_backend::{MemoryChain, MemoryStore};
use rc_rust::{ChannelCommitmentInfo, CommitmentError, CommitmentManager, NodeIdentity};

const REDEMPTIONS: usize = 25;

#[tokio::main]
async fn main() {
    let config = match env::args().nth(1) {
        Some(path) => NodeConfig::from_yaml_file(&path).unwrap_or_else(|e| {
            eprintln!("Failed to load {}: {}", path, e);
            std::process::exit(1);
        }),
        None => NodeConfig::default(),
    };

    let level = config.level_filter().unwrap_or(log::LevelFilter::Info);
    SimpleLogger::new().with_level(level).init().unwrap();

    info!("starting");

    let result = match &config.db_path {
        #[cfg(feature = "rocksdb-backend")]
        Some(path) => match rc_rust::rc_rocksdb_backend::RocksDbStore::open(path) {
            Ok(store) => run(Arc::new(store), &config).await,
            Err(e) => Err(e.into()),
        },
        #[cfg(not(feature = "rocksdb-backend"))]
        Some(path) => {
            log::warn!(
                "db_path {} ignored, built without rocksdb-backend",
                path.display()
            );
            run(Arc::new(MemoryStore::new()), &config).await
        }
        None => run(Arc::new(MemoryStore::new()), &config).await,
    };

    if let Err(e) = result {
        eprintln!("commitment demo failed: {}", e);
        std::process::exit(1);
    }
}

async fn run<S: CommitmentStore>(store: Arc<S>, config: &NodeConfig) -> Result<(), CommitmentError> {
    let manager = CommitmentManager::new(store, config.commitment)?;
    let identity = NodeIdentity::new();

    let channel_id = ChannelId(Hash::create(identity.public_key.as_bytes()));
    let info = ChannelCommitmentInfo::builder()
        .chain_id(100)
        .contract_address("0x2a54194c8fe0e3cdeaa39c49b95495aa3b44db63")
        .channel_id(channel_id)
        .channel_epoch(ChannelEpoch(1))
        .build()?;
    let chain = MemoryChain::new();

    info!(
        "initializing channel {} ({} iterations, block size {})",
        channel_id, config.commitment.total_iterations, config.commitment.block_size
    );
    manager.initialize_commitment(&identity, &info, &chain).await?;

    for i in 0..REDEMPTIONS {
        let mut session = manager.redeem(&channel_id).await;
        let preimage = session.find_preimage().await?;
        session.bump(&preimage).await?;

        if i % 5 == 0 {
            info!("{}: revealed {}", i, preimage);
        }
    }

    // second initialization must leave the healthy channel alone
    manager.initialize_commitment(&identity, &info, &chain).await?;

    info!(
        "done: {} redemptions, {} chain(s) generated, on-chain head {}",
        manager.bump_count(&channel_id).await,
        manager.generation_count(&channel_id).await,
        chain.commitment().map(|h| h.to_string()).unwrap_or_default()
    );
    Ok(())
}
