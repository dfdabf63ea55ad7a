//! RocksDB-backed local document cache.
//!
//! Column families:
//! - `snapshots`: one LZ4-compressed Yrs state per document
//! - `updates`: LZ4-compressed incremental updates, keyed by
//!   `<len-prefixed doc id><sequence:8 bytes big-endian>`
//!
//! Reference: Kleppmann, DDIA, Chapter 3 (LSM Trees, SSTables)

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use folio_core::{DocumentId, Replica, UpdateOrigin};
use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};

use super::{LocalStore, LocalStoreHandle, ReadySignal, StoreError, SubscriptionSlot};

const CF_SNAPSHOTS: &str = "snapshots";
const CF_UPDATES: &str = "updates";

const COLUMN_FAMILIES: &[&str] = &[CF_SNAPSHOTS, CF_UPDATES];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

struct StoreInner {
    /// RocksDB instance (single-threaded mode, driven from tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl StoreInner {
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }

    fn update_key(id: &DocumentId, sequence: u64) -> Vec<u8> {
        let mut key = id.key_prefix();
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    fn load_snapshot(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_cf(&cf, id.key_prefix())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| StoreError::Compression(e.to_string())),
            None => Ok(None),
        }
    }

    fn append_update(&self, id: &DocumentId, sequence: u64, update: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(CF_UPDATES)?;
        let compressed = lz4_flex::compress_prepend_size(update);
        self.db.put_cf_opt(
            &cf,
            Self::update_key(id, sequence),
            compressed,
            &self.write_options(),
        )?;
        Ok(())
    }

    /// All stored updates for `id`, in sequence order.
    fn load_updates(&self, id: &DocumentId) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let cf = self.cf(CF_UPDATES)?;
        let prefix = id.key_prefix();

        let mut updates = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) || key.len() != prefix.len() + 8 {
                break;
            }
            let mut seq = [0u8; 8];
            seq.copy_from_slice(&key[prefix.len()..]);
            let update = lz4_flex::decompress_size_prepended(&value)
                .map_err(|e| StoreError::Compression(e.to_string()))?;
            updates.push((u64::from_be_bytes(seq), update));
        }
        Ok(updates)
    }

    /// Replace the update log of `id` with a single snapshot, atomically.
    fn compact(&self, id: &DocumentId, snapshot: &[u8]) -> Result<usize, StoreError> {
        let cf_snapshots = self.cf(CF_SNAPSHOTS)?;
        let cf_updates = self.cf(CF_UPDATES)?;
        let prefix = id.key_prefix();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_snapshots, &prefix, lz4_flex::compress_prepend_size(snapshot));

        let mut removed = 0;
        let iter = self
            .db
            .iterator_cf(&cf_updates, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            batch.delete_cf(&cf_updates, &key);
            removed += 1;
        }

        self.db.write_opt(batch, &self.write_options())?;
        Ok(removed)
    }
}

/// RocksDB-backed `LocalStore`.
#[derive(Clone)]
pub struct RocksStore {
    inner: Arc<StoreInner>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened local store at {}", config.path.display());

        Ok(Self {
            inner: Arc::new(StoreInner { db, config }),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_SNAPSHOTS => {
                // Values are already LZ4 framed.
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_UPDATES => {
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(4);
            }
            _ => {}
        }

        opts
    }

    /// Documents that have a compacted snapshot.
    pub fn documents(&self) -> Result<Vec<DocumentId>, StoreError> {
        let cf = self.inner.cf(CF_SNAPSHOTS)?;
        let mut ids = Vec::new();
        for item in self.inner.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            if key.len() < 4 {
                continue;
            }
            if let Ok(id) = String::from_utf8(key[4..].to_vec()) {
                ids.push(DocumentId::from(id));
            }
        }
        Ok(ids)
    }

    /// Number of uncompacted updates for `id`.
    pub fn pending_updates(&self, id: &DocumentId) -> Result<usize, StoreError> {
        Ok(self.inner.load_updates(id)?.len())
    }
}

#[async_trait]
impl LocalStore for RocksStore {
    async fn open(
        &self,
        id: &DocumentId,
        replica: Arc<Replica>,
        ready: ReadySignal,
    ) -> Result<Box<dyn LocalStoreHandle>, StoreError> {
        let snapshot = self.inner.load_snapshot(id)?;
        let updates = self.inner.load_updates(id)?;

        if let Some(snapshot) = snapshot {
            if let Err(e) = replica.apply_update(&snapshot, UpdateOrigin::Store) {
                log::warn!("Skipping unreadable snapshot for {id}: {e}");
            }
        }
        for (sequence, update) in &updates {
            if let Err(e) = replica.apply_update(update, UpdateOrigin::Store) {
                log::warn!("Skipping stored update {sequence} for {id}: {e}");
            }
        }
        log::debug!("Replayed {} stored updates into {id}", updates.len());

        let next_sequence = Arc::new(AtomicU64::new(
            updates.last().map_or(0, |(sequence, _)| sequence + 1),
        ));
        let subscription = {
            let inner = self.inner.clone();
            let doc_id = id.clone();
            let next_sequence = next_sequence.clone();
            replica.observe_updates(move |update, origin| {
                if origin == UpdateOrigin::Store {
                    return;
                }
                let sequence = next_sequence.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = inner.append_update(&doc_id, sequence, update) {
                    log::error!("Failed to persist update {sequence} for {doc_id}: {e}");
                }
            })?
        };

        ready.signal();

        Ok(Box::new(RocksHandle {
            id: id.clone(),
            replica,
            inner: self.inner.clone(),
            subscription: Mutex::new(Some(subscription)),
        }))
    }
}

struct RocksHandle {
    id: DocumentId,
    replica: Arc<Replica>,
    inner: Arc<StoreInner>,
    subscription: SubscriptionSlot,
}

#[async_trait]
impl LocalStoreHandle for RocksHandle {
    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    async fn close(&self) -> Result<(), StoreError> {
        let Some(subscription) = self.subscription.lock().take() else {
            return Ok(());
        };
        drop(subscription);

        if self.replica.is_destroyed() {
            log::debug!("Replica for {} already destroyed, leaving update log as is", self.id);
            return Ok(());
        }
        let snapshot = self.replica.encode_state()?;
        let removed = self.inner.compact(&self.id, &snapshot)?;
        log::debug!("Compacted {removed} updates for {} into a snapshot", self.id);
        Ok(())
    }
}
