use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::Keypair;
use parking_lot::RwLock;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::blockindex::{BlockIndex, BlockNode};
use crate::config::ChainConfig;
use crate::crypto::{self, public_key_to_hex};
use crate::errors::{ChainError, ChainResult};
use crate::queryindex::QueryIndex;
use crate::runtime::ChainRuntime;
use crate::storage::{composite_key, ChainStore};
use crate::types::{Block, Hash, SignedAckHeader, SignedResponseHeader, HASH_LEN};

/// Snapshot of the current best tip. Mutated only through
/// [`Chain::push_block`].
#[derive(Clone)]
pub struct ChainState {
    pub node: Option<Arc<BlockNode>>,
    pub head: Hash,
    pub height: i32,
}

impl ChainState {
    /// Persistent encoding: head hash followed by the big-endian height.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HASH_LEN + 4);
        bytes.extend_from_slice(self.head.as_bytes());
        bytes.extend_from_slice(&self.height.to_be_bytes());
        bytes
    }

    pub fn decode(data: &[u8]) -> ChainResult<(Hash, i32)> {
        if data.len() != HASH_LEN + 4 {
            return Err(ChainError::Config(format!(
                "invalid state encoding of {} bytes",
                data.len()
            )));
        }
        let head = Hash::from_slice(&data[..HASH_LEN])?;
        let height = i32::from_be_bytes(
            data[HASH_LEN..]
                .try_into()
                .map_err(|_| ChainError::Config("invalid state height encoding".into()))?,
        );
        Ok((head, height))
    }
}

/// The chain engine: in-memory block and query indices over a durable
/// store, plus the turn-based producer driven by the coordinated clock.
pub struct Chain {
    cfg: ChainConfig,
    keypair: Keypair,
    store: ChainStore,
    block_index: RwLock<BlockIndex>,
    query_index: RwLock<QueryIndex>,
    runtime: ChainRuntime,
    state: RwLock<ChainState>,
    pending_block: RwLock<Block>,
}

impl Chain {
    /// Creates a fresh chain anchored at the configured genesis block.
    pub fn new(cfg: ChainConfig) -> ChainResult<Self> {
        cfg.validate()?;
        let genesis = cfg.genesis()?.clone();
        genesis.verify_as_genesis()?;
        cfg.ensure_directories()?;
        let keypair = crypto::load_or_generate_keypair(&cfg.key_path)?;
        let store = ChainStore::open(&cfg.data_dir)?;
        let runtime = ChainRuntime::new(&cfg, genesis.timestamp(), 1);
        let pending = Block::pending(
            cfg.server_id.clone(),
            public_key_to_hex(&keypair.public),
            *genesis.block_hash(),
        );
        let chain = Self {
            state: RwLock::new(ChainState {
                node: None,
                head: genesis.signed_header.header.genesis_hash,
                // Negative height marks the not-yet-pushed tip.
                height: -1,
            }),
            pending_block: RwLock::new(pending),
            block_index: RwLock::new(BlockIndex::new()),
            query_index: RwLock::new(QueryIndex::new()),
            cfg,
            keypair,
            store,
            runtime,
        };
        chain.push_block(&genesis)?;
        info!(head = %chain.head(), "created new chain");
        Ok(chain)
    }

    /// Loads the chain state from the store and rebuilds the in-memory
    /// indices.
    pub fn load(cfg: ChainConfig) -> ChainResult<Self> {
        cfg.validate()?;
        let genesis = cfg.genesis()?.clone();
        cfg.ensure_directories()?;
        let keypair = crypto::load_or_generate_keypair(&cfg.key_path)?;
        let store = ChainStore::open(&cfg.data_dir)?;

        let state_bytes = store
            .read_state()?
            .ok_or_else(|| ChainError::Config("store holds no chain state".into()))?;
        let (head, height) = ChainState::decode(&state_bytes)?;
        let runtime = ChainRuntime::new(&cfg, genesis.timestamp(), height + 1);

        // Replay blocks in height order, verifying each link.
        let mut block_index = BlockIndex::new();
        let mut blocks: Vec<(i32, Block)> = Vec::new();
        let mut last: Option<Arc<BlockNode>> = None;
        for (_, value) in store.iter_blocks()? {
            let block = Block::from_bytes(&value)?;
            let parent = match &last {
                None => {
                    block.verify_as_genesis()?;
                    None
                }
                Some(prev) if block.parent_hash() == &prev.hash => {
                    block.signed_header.verify()?;
                    Some(Arc::clone(prev))
                }
                Some(_) => {
                    let parent = block_index
                        .lookup(block.parent_hash())
                        .ok_or(ChainError::ParentNotFound)?;
                    block.signed_header.verify()?;
                    Some(parent)
                }
            };
            debug!(hash = %block.block_hash(), "read block from store");
            blocks.push((runtime.height_from_time(block.timestamp()), block.clone()));
            let node = Arc::new(BlockNode::new(block, parent));
            block_index.add(Arc::clone(&node));
            last = Some(node);
        }
        let node = block_index
            .lookup(&head)
            .ok_or_else(|| ChainError::Config("chain head missing from block index".into()))?;

        // Replay per-height query logs, then block membership.
        let mut query_index = QueryIndex::new();
        for (h, value) in store.iter_responses()? {
            query_index.add_response(h, bincode::deserialize(&value)?)?;
        }
        for (h, value) in store.iter_acks()? {
            query_index.add_ack(h, bincode::deserialize(&value)?)?;
        }
        for (h, block) in &blocks {
            query_index.set_signed_block(*h, block);
        }

        let pending = Block::pending(
            cfg.server_id.clone(),
            public_key_to_hex(&keypair.public),
            *genesis.block_hash(),
        );
        info!(head = %head, height, "loaded chain from store");
        Ok(Self {
            state: RwLock::new(ChainState {
                node: Some(node),
                head,
                height,
            }),
            pending_block: RwLock::new(pending),
            block_index: RwLock::new(block_index),
            query_index: RwLock::new(query_index),
            cfg,
            keypair,
            store,
            runtime,
        })
    }

    pub fn head(&self) -> Hash {
        self.state.read().head
    }

    pub fn height(&self) -> i32 {
        self.state.read().height
    }

    pub fn runtime(&self) -> &ChainRuntime {
        &self.runtime
    }

    pub fn config(&self) -> &ChainConfig {
        &self.cfg
    }

    /// Query hashes collected into the pending block so far.
    pub fn pending_queries(&self) -> Vec<Hash> {
        self.pending_block.read().queries.clone()
    }

    /// Extends the best chain with a signed block. The state snapshot
    /// and the block entry are committed in one write batch; in-memory
    /// indices are updated only after the commit succeeds.
    pub fn push_block(&self, block: &Block) -> ChainResult<()> {
        let mut state = self.state.write();
        self.push_block_locked(&mut state, block)
    }

    /// Commits `block` against the locked tip and applies the in-memory
    /// updates. The caller holds the state write lock, so any checks it
    /// ran against `state` stay valid through the commit.
    fn push_block_locked(&self, state: &mut ChainState, block: &Block) -> ChainResult<()> {
        let height = self.runtime.height_from_time(block.timestamp());
        let node = Arc::new(BlockNode::new(block.clone(), state.node.clone()));
        let new_state = ChainState {
            node: Some(Arc::clone(&node)),
            head: node.hash,
            height: node.height,
        };
        let encoded = block.to_bytes()?;
        self.store
            .store_block(&node.index_key(), &encoded, &new_state.to_bytes())?;
        *state = new_state;
        self.block_index.write().add(Arc::clone(&node));
        self.query_index.write().set_signed_block(height, block);
        debug!(height = node.height, hash = %node.hash, "pushed block");
        Ok(())
    }

    /// Verifies an incoming block against the current tip and pushes it.
    /// The tip lock is held from validation through the commit, so two
    /// concurrent children of the same head cannot both pass the parent
    /// check, and a resubmitted block hash is always caught.
    pub fn check_and_push_new_block(&self, block: &Block) -> ChainResult<()> {
        let mut state = self.state.write();
        if block.parent_hash() != &state.head {
            return Err(ChainError::InvalidBlock);
        }
        if self.block_index.read().has(block.block_hash()) {
            return Err(ChainError::BlockExists);
        }
        let height = self.runtime.height_from_time(block.timestamp());
        if height != state.height + 1 {
            return Err(ChainError::BlockTimestampOutOfPeriod);
        }
        {
            let query_index = self.query_index.read();
            for query in &block.queries {
                if !query_index.check_ack_from_block(height, block.block_hash(), query)? {
                    // The ack travels out of band; the block is accepted
                    // and the ack fetched from the producer later.
                    warn!(height, ack = %query, producer = %block.producer(),
                        "block acknowledges a query unknown locally");
                }
            }
        }
        block.verify()?;
        self.push_block_locked(&mut state, block)
    }

    /// Records a responded query under its request-derived height.
    pub fn push_responded_query(&self, response: &SignedResponseHeader) -> ChainResult<()> {
        let height = self.runtime.height_from_time(response.request_timestamp());
        let enc_response = bincode::serialize(response)?;
        let enc_request = bincode::serialize(&response.header.request)?;
        let mut query_index = self.query_index.write();
        query_index.check_new_response(height, response)?;
        self.store.store_response(
            &composite_key(height, &response.header_hash),
            &enc_response,
            &composite_key(height, &response.header.request.header_hash),
            &enc_request,
        )?;
        query_index.add_response(height, response.clone())
    }

    /// Records an acknowledged query under its response-derived height.
    /// On this node's own turn the ack is also collected into the
    /// pending block.
    pub fn push_acked_query(&self, ack: &SignedAckHeader) -> ChainResult<()> {
        let height = self.runtime.height_from_time(ack.response_timestamp());
        let encoded = bincode::serialize(ack)?;
        let mut query_index = self.query_index.write();
        query_index.check_new_ack(height, ack)?;
        self.store
            .store_ack(&composite_key(height, &ack.header_hash), &encoded)?;
        query_index.add_ack(height, ack.clone())?;
        drop(query_index);
        if self.is_my_turn() {
            self.pending_block.write().push_acked_query(&ack.header_hash);
        }
        Ok(())
    }

    /// Verifies a responded query and pushes it if still within the TTL
    /// window.
    pub fn verify_and_push_responded_query(
        &self,
        response: &SignedResponseHeader,
    ) -> ChainResult<()> {
        if self.runtime.query_time_is_expired(response.header.timestamp) {
            return Err(ChainError::QueryExpired);
        }
        response.verify()?;
        self.push_responded_query(response)
    }

    /// Verifies an acknowledged query and pushes it if still within the
    /// TTL window.
    pub fn verify_and_push_acked_query(&self, ack: &SignedAckHeader) -> ChainResult<()> {
        if self.runtime.query_time_is_expired(ack.response_timestamp()) {
            return Err(ChainError::QueryExpired);
        }
        ack.verify()?;
        self.push_acked_query(ack)
    }

    /// Whether this node produces the block of the current turn.
    pub fn is_my_turn(&self) -> bool {
        self.cfg.block_producer
    }

    /// Seals the pending block on top of `parent` and pushes it.
    pub fn produce_block(&self, parent: Hash, now: DateTime<Utc>) -> ChainResult<()> {
        let block = {
            let mut pending = self.pending_block.write();
            pending.signed_header.header.parent_hash = parent;
            pending.signed_header.header.timestamp = now;
            pending.pack_and_sign_block(&self.keypair)?;
            pending.clone()
        };
        self.push_block(&block)?;
        // The next turn collects into an empty query list.
        self.pending_block.write().queries.clear();
        info!(height = self.height(), hash = %block.block_hash(), "produced block");
        Ok(())
    }

    /// Runs one turn: produce a block if it is this node's turn, then
    /// advance to the next turn regardless of the outcome.
    pub fn run_current_turn(&self, now: DateTime<Utc>) {
        if self.is_my_turn() {
            let head = self.head();
            if let Err(err) = self.produce_block(head, now) {
                error!(?err, "block production failed, stopping producer");
                self.stop();
            }
        }
        self.runtime.advance_turn();
    }

    async fn block_producing_cycle(&self) {
        let mut stop = self.runtime.subscribe_stop();
        loop {
            if *stop.borrow() {
                return;
            }
            let (now, wait) = self.runtime.till_next_turn();
            if wait > Duration::zero() {
                let sleep = wait.to_std().unwrap_or_default();
                tokio::select! {
                    _ = time::sleep(sleep) => {}
                    _ = stop.changed() => {}
                }
            } else {
                self.run_current_turn(now);
            }
        }
    }

    /// Synchronizes blocks and queries from peers. Peer transport is an
    /// external collaborator; a standalone chain has nothing to
    /// reconcile.
    pub async fn sync(&self) -> ChainResult<()> {
        Ok(())
    }

    /// Runs the producer until [`Chain::stop`] is called. A failed sync
    /// prevents the cycle from starting.
    pub async fn start(&self) -> ChainResult<()> {
        self.sync().await?;
        info!(server = %self.cfg.server_id, height = self.height(), "starting producer cycle");
        self.block_producing_cycle().await;
        Ok(())
    }

    pub fn stop(&self) {
        self.runtime.stop();
    }

    /// Fetches the block at `height` on the best chain from the store.
    pub fn fetch_block(&self, height: i32) -> ChainResult<Option<Block>> {
        let node = {
            let state = self.state.read();
            state.node.as_ref().and_then(|node| node.ancestor(height))
        };
        let node = match node {
            Some(node) => node,
            None => return Ok(None),
        };
        match self.store.read_block_raw(&node.index_key())? {
            Some(raw) => Ok(Some(Block::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    /// Fetches an acknowledged query from the in-memory index.
    pub fn fetch_acked_query(&self, height: i32, header_hash: &Hash) -> ChainResult<SignedAckHeader> {
        self.query_index.read().get_ack(height, header_hash)
    }

    /// Fetches a responded query from the in-memory index.
    pub fn fetch_responded_query(
        &self,
        height: i32,
        header_hash: &Hash,
    ) -> ChainResult<SignedResponseHeader> {
        self.query_index.read().get_response(height, header_hash)
    }

    /// Checks whether `ack_hash` may be acknowledged by the block
    /// `block_hash` at `height`.
    pub fn check_ack_from_block(
        &self,
        height: i32,
        block_hash: &Hash,
        ack_hash: &Hash,
    ) -> ChainResult<bool> {
        self.query_index
            .read()
            .check_ack_from_block(height, block_hash, ack_hash)
    }
}
