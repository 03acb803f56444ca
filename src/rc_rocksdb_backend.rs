// RocksDB-based persistent storage for commitment chains using Column Families
//
// Architecture:
// - Single RocksDB instance with two Column Families
// - "intermediates" CF: ChannelId || iteration (u64 BE) -> Hash
// - "current" CF: ChannelId -> current commitment Hash
// - A new chain replaces the old one in a single WriteBatch (delete range + puts)
//
// Point reads and writes are small, so they run directly on the async task.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};

use crate::rc_errors::StoreError;
use crate::rc_interface::{ChannelId, CommitmentStore, Hash, IteratedHash, HASH_LENGTH};

// Column family names
const CF_INTERMEDIATES: &str = "intermediates";
const CF_CURRENT: &str = "current";

const INTERMEDIATE_KEY_LENGTH: usize = HASH_LENGTH + 8;

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.into_string())
    }
}

/// Commitment store persisted in RocksDB
///
/// # Example
/// ```rust,ignore
/// let store = RocksDbStore::open("./data/commitments")?;
/// let manager = CommitmentManager::new(Arc::new(store), CommitmentConfig::default())?;
/// ```
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_intermediates =
            ColumnFamilyDescriptor::new(CF_INTERMEDIATES, Self::intermediates_cf_options());
        let cf_current = ColumnFamilyDescriptor::new(CF_CURRENT, Options::default());

        let db = DB::open_cf_descriptors(&db_opts, path, vec![cf_intermediates, cf_current])?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Intermediates are written once per chain and read point-wise
    fn intermediates_cf_options() -> Options {
        let mut opts = Options::default();

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        // hashes do not compress
        opts.set_compression_type(rocksdb::DBCompressionType::None);

        opts
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {}", name)))
    }

    #[inline]
    fn encode_key(channel_id: &ChannelId, iteration: u64) -> [u8; INTERMEDIATE_KEY_LENGTH] {
        let mut key = [0u8; INTERMEDIATE_KEY_LENGTH];
        key[..HASH_LENGTH].copy_from_slice(channel_id.as_bytes());
        key[HASH_LENGTH..].copy_from_slice(&iteration.to_be_bytes());
        key
    }

    fn to_u64(iteration: usize) -> Result<u64, StoreError> {
        u64::try_from(iteration).map_err(|_| StoreError::Corrupted {
            reason: format!("iteration {} does not fit the key encoding", iteration),
        })
    }

    pub fn stats(&self) -> Option<String> {
        self.db.property_value("rocksdb.stats").ok().flatten()
    }
}

// RocksDB calls block the worker thread; they are single point reads or one
// batched write, so they run inline rather than on `spawn_blocking`.
#[async_trait]
impl CommitmentStore for RocksDbStore {
    async fn get_commitment(
        &self,
        channel_id: &ChannelId,
        iteration: usize,
    ) -> Result<Option<Hash>, StoreError> {
        let key = Self::encode_key(channel_id, Self::to_u64(iteration)?);
        self.db
            .get_cf(self.cf(CF_INTERMEDIATES)?, key)?
            .map(|value| Hash::from_bytes(&value))
            .transpose()
    }

    async fn get_current_commitment(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<Hash>, StoreError> {
        self.db
            .get_cf(self.cf(CF_CURRENT)?, channel_id.as_bytes())?
            .map(|value| Hash::from_bytes(&value))
            .transpose()
    }

    async fn set_current_commitment(
        &self,
        channel_id: &ChannelId,
        commitment: &Hash,
    ) -> Result<(), StoreError> {
        self.db
            .put_cf(self.cf(CF_CURRENT)?, channel_id.as_bytes(), commitment.as_bytes())?;
        Ok(())
    }

    async fn store_hash_intermediaries(
        &self,
        channel_id: &ChannelId,
        chain: &IteratedHash,
    ) -> Result<(), StoreError> {
        let cf = self.cf(CF_INTERMEDIATES)?;
        let mut batch = WriteBatch::default();

        // drop whatever chain was stored for the channel before
        batch.delete_range_cf(
            cf,
            Self::encode_key(channel_id, 0),
            Self::encode_key(channel_id, u64::MAX),
        );

        for point in &chain.intermediates {
            let key = Self::encode_key(channel_id, Self::to_u64(point.iteration)?);
            batch.put_cf(cf, key, point.intermediate.as_bytes());
        }

        self.db.write(batch)?;
        Ok(())
    }
}
