use std::collections::HashMap;
use std::sync::Arc;

use crate::storage::composite_key;
use crate::types::{Block, Hash};

/// Immutable in-memory node of the block tree. Non-genesis nodes keep a
/// handle to their parent, so ancestor walks never touch the store.
#[derive(Debug)]
pub struct BlockNode {
    pub hash: Hash,
    pub height: i32,
    pub parent: Option<Arc<BlockNode>>,
    pub block: Block,
}

impl BlockNode {
    pub fn new(block: Block, parent: Option<Arc<BlockNode>>) -> Self {
        let height = parent.as_ref().map_or(0, |parent| parent.height + 1);
        Self {
            hash: *block.block_hash(),
            height,
            parent,
            block,
        }
    }

    /// Walks parent handles down to `height`. Returns `None` above the
    /// current height or below genesis.
    pub fn ancestor(self: &Arc<Self>, height: i32) -> Option<Arc<BlockNode>> {
        if height > self.height || height < 0 {
            return None;
        }
        let mut node = Arc::clone(self);
        while node.height > height {
            node = Arc::clone(node.parent.as_ref()?);
        }
        Some(node)
    }

    /// Storage key of the block entry: big-endian height followed by the
    /// block hash, so that store iteration is height-ordered.
    pub fn index_key(&self) -> Vec<u8> {
        composite_key(self.height, &self.hash)
    }
}

/// Mapping of block hash to node. Nodes are append-only and never
/// removed.
#[derive(Default)]
pub struct BlockIndex {
    nodes: HashMap<Hash, Arc<BlockNode>>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: Arc<BlockNode>) {
        self.nodes.insert(node.hash, node);
    }

    pub fn lookup(&self, hash: &Hash) -> Option<Arc<BlockNode>> {
        self.nodes.get(hash).cloned()
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
