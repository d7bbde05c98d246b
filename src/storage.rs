use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::errors::{ChainError, ChainResult};
use crate::types::{Hash, HASH_LEN};

pub(crate) const CF_STATE: &str = "state";
pub(crate) const CF_BLOCKS: &str = "blocks";
pub(crate) const CF_REQUESTS: &str = "requests";
pub(crate) const CF_RESPONSES: &str = "responses";
pub(crate) const CF_ACKS: &str = "acks";
const STATE_KEY: &[u8] = b"chain-state";

/// Builds the composite key `big-endian(height) || hash` shared by the
/// block and per-height query column families.
pub fn composite_key(height: i32, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + HASH_LEN);
    key.extend_from_slice(&(height as u32).to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Splits a composite key back into its height prefix.
pub fn key_height(key: &[u8]) -> ChainResult<i32> {
    let prefix: [u8; 4] = key
        .get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| ChainError::Config("invalid composite key".into()))?;
    Ok(u32::from_be_bytes(prefix) as i32)
}

/// Durable store of chain state, blocks and per-height query logs. Each
/// mutating engine operation commits exactly one write batch; the batch
/// commit is the linearization point for the in-memory indices.
pub struct ChainStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl ChainStore {
    pub fn open(path: &Path) -> ChainResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_STATE, Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_REQUESTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_RESPONSES, Options::default()),
            ColumnFamilyDescriptor::new(CF_ACKS, Options::default()),
        ];
        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> ChainResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ChainError::Config(format!("missing column family {name}")))
    }

    pub fn read_state(&self) -> ChainResult<Option<Vec<u8>>> {
        Ok(self.db.get_cf(&self.cf(CF_STATE)?, STATE_KEY)?)
    }

    /// Atomically writes the block entry together with the new state
    /// snapshot.
    pub fn store_block(
        &self,
        index_key: &[u8],
        block: &[u8],
        state: &[u8],
    ) -> ChainResult<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_STATE)?, STATE_KEY, state);
        batch.put_cf(&self.cf(CF_BLOCKS)?, index_key, block);
        self.db.write(batch)?;
        Ok(())
    }

    /// Atomically writes a response header and the request header it
    /// wraps under their height-prefixed keys.
    pub fn store_response(
        &self,
        response_key: &[u8],
        response: &[u8],
        request_key: &[u8],
        request: &[u8],
    ) -> ChainResult<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_RESPONSES)?, response_key, response);
        batch.put_cf(&self.cf(CF_REQUESTS)?, request_key, request);
        self.db.write(batch)?;
        Ok(())
    }

    pub fn store_ack(&self, ack_key: &[u8], ack: &[u8]) -> ChainResult<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_ACKS)?, ack_key, ack);
        self.db.write(batch)?;
        Ok(())
    }

    pub fn read_block_raw(&self, index_key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        Ok(self.db.get_cf(&self.cf(CF_BLOCKS)?, index_key)?)
    }

    /// All block entries in key order, which is height order.
    pub fn iter_blocks(&self) -> ChainResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.iter_cf(CF_BLOCKS)
    }

    /// All response entries keyed by height.
    pub fn iter_responses(&self) -> ChainResult<Vec<(i32, Vec<u8>)>> {
        self.iter_cf_heights(CF_RESPONSES)
    }

    /// All ack entries keyed by height.
    pub fn iter_acks(&self) -> ChainResult<Vec<(i32, Vec<u8>)>> {
        self.iter_cf_heights(CF_ACKS)
    }

    fn iter_cf(&self, name: &str) -> ChainResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(name)?;
        let mut entries = Vec::new();
        let mut iterator = self.db.iterator_cf(&cf, IteratorMode::Start);
        while let Some(entry) = iterator.next() {
            let (key, value) = entry?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn iter_cf_heights(&self, name: &str) -> ChainResult<Vec<(i32, Vec<u8>)>> {
        self.iter_cf(name)?
            .into_iter()
            .map(|(key, value)| Ok((key_height(&key)?, value)))
            .collect()
    }
}

impl Clone for ChainStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}
