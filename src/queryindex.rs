use std::collections::{hash_map::Entry, HashMap, HashSet};

use crate::errors::{ChainError, ChainResult};
use crate::types::{Block, Hash, SignedAckHeader, SignedResponseHeader};

/// A tracked response and the hash of the ack that references it, if
/// one arrived. At most one ack may reference a response per height.
#[derive(Clone, Debug)]
pub struct ResponseRecord {
    pub response: SignedResponseHeader,
    pub ack: Option<Hash>,
}

/// A tracked ack and the hashes of the signed blocks that include it.
/// `ack` stays `None` for a placeholder created by block inclusion
/// before the ack itself arrives.
#[derive(Clone, Debug, Default)]
pub struct AckRecord {
    pub ack: Option<SignedAckHeader>,
    pub blocks: HashSet<Hash>,
}

#[derive(Default)]
struct HeightIndex {
    responses: HashMap<Hash, ResponseRecord>,
    acks: HashMap<Hash, AckRecord>,
    signed_blocks: HashMap<Hash, Block>,
}

/// Per-height index of request/response/ack triples and their block
/// membership. Records are additive; nothing is removed from an active
/// height.
#[derive(Default)]
pub struct QueryIndex {
    heights: HashMap<i32, HeightIndex>,
}

impl QueryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a response. Idempotent for byte-identical duplicates; a
    /// different response under the same header hash is rejected.
    pub fn add_response(&mut self, height: i32, response: SignedResponseHeader) -> ChainResult<()> {
        let index = self.heights.entry(height).or_default();
        match index.responses.entry(response.header_hash) {
            Entry::Vacant(entry) => {
                entry.insert(ResponseRecord {
                    response,
                    ack: None,
                });
            }
            Entry::Occupied(entry) => {
                if entry.get().response != response {
                    return Err(ChainError::MultipleResponses);
                }
            }
        }
        Ok(())
    }

    /// Returns the error `add_response` would produce, without mutating.
    pub fn check_new_response(
        &self,
        height: i32,
        response: &SignedResponseHeader,
    ) -> ChainResult<()> {
        match self
            .heights
            .get(&height)
            .and_then(|index| index.responses.get(&response.header_hash))
        {
            Some(record) if record.response != *response => Err(ChainError::MultipleResponses),
            _ => Ok(()),
        }
    }

    /// Records an ack and cross-references the wrapped response,
    /// inserting the response first if it was not previously seen. The
    /// first ack for a response wins; a different second ack is
    /// rejected.
    pub fn add_ack(&mut self, height: i32, ack: SignedAckHeader) -> ChainResult<()> {
        let index = self.heights.entry(height).or_default();
        match index.responses.entry(ack.response_header().header_hash) {
            Entry::Vacant(entry) => {
                entry.insert(ResponseRecord {
                    response: ack.response_header().clone(),
                    ack: Some(ack.header_hash),
                });
            }
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                match record.ack {
                    Some(existing) if existing != ack.header_hash => {
                        return Err(ChainError::MultipleAcks);
                    }
                    _ => record.ack = Some(ack.header_hash),
                }
            }
        }
        // Merge into any placeholder so recorded block membership
        // survives out-of-order arrival.
        index.acks.entry(ack.header_hash).or_default().ack = Some(ack);
        Ok(())
    }

    /// Returns the error `add_ack` would produce, without mutating.
    pub fn check_new_ack(&self, height: i32, ack: &SignedAckHeader) -> ChainResult<()> {
        match self
            .heights
            .get(&height)
            .and_then(|index| index.responses.get(&ack.response_header().header_hash))
            .and_then(|record| record.ack)
        {
            Some(existing) if existing != ack.header_hash => Err(ChainError::MultipleAcks),
            _ => Ok(()),
        }
    }

    /// Marks every ack the block acknowledges as included in it,
    /// creating placeholder records for acks that have not arrived yet.
    pub fn set_signed_block(&mut self, height: i32, block: &Block) {
        let index = self.heights.entry(height).or_default();
        for query in &block.queries {
            index
                .acks
                .entry(*query)
                .or_default()
                .blocks
                .insert(*block.block_hash());
        }
        index.signed_blocks.insert(*block.block_hash(), block.clone());
    }

    /// Checks whether `ack_hash` may be acknowledged by `block_hash`.
    /// `Ok(false)` means the ack is unknown locally and must be fetched
    /// from the producer.
    pub fn check_ack_from_block(
        &self,
        height: i32,
        block_hash: &Hash,
        ack_hash: &Hash,
    ) -> ChainResult<bool> {
        let record = match self
            .heights
            .get(&height)
            .and_then(|index| index.acks.get(ack_hash))
        {
            Some(record) => record,
            None => return Ok(false),
        };
        if record.blocks.iter().any(|included| included != block_hash) {
            return Err(ChainError::MultipleAcksInBlocks);
        }
        Ok(record.ack.is_some())
    }

    pub fn get_ack(&self, height: i32, ack_hash: &Hash) -> ChainResult<SignedAckHeader> {
        self.heights
            .get(&height)
            .and_then(|index| index.acks.get(ack_hash))
            .and_then(|record| record.ack.clone())
            .ok_or(ChainError::AckNotFound)
    }

    pub fn get_response(
        &self,
        height: i32,
        header_hash: &Hash,
    ) -> ChainResult<SignedResponseHeader> {
        self.heights
            .get(&height)
            .and_then(|index| index.responses.get(header_hash))
            .map(|record| record.response.clone())
            .ok_or(ChainError::ResponseNotFound)
    }
}
