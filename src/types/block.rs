use chrono::{DateTime, Utc};
use ed25519_dalek::Keypair;
use serde::{Deserialize, Serialize};

use crate::crypto::{
    self, compute_merkle_root, public_key_from_hex, public_key_to_hex, signature_from_hex,
    signature_to_hex,
};
use crate::errors::{ChainError, ChainResult};

use super::{Hash, NodeId};

pub const BLOCK_VERSION: u32 = 0x0100_0000;

/// Block header fields covered by the producer signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub producer: NodeId,
    pub genesis_hash: Hash,
    pub parent_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: DateTime<Utc>,
}

impl Header {
    pub fn canonical_bytes(&self) -> ChainResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn compute_hash(&self) -> ChainResult<Hash> {
        Ok(crypto::sha256(&self.canonical_bytes()?))
    }
}

/// Header plus its self-hash and the producer signature over that hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedHeader {
    pub header: Header,
    pub block_hash: Hash,
    pub signee: String,
    pub signature: String,
}

impl SignedHeader {
    pub fn verify(&self) -> ChainResult<()> {
        if self.header.compute_hash()? != self.block_hash {
            return Err(ChainError::Crypto("block hash mismatch".into()));
        }
        let signee = public_key_from_hex(&self.signee)?;
        let signature = signature_from_hex(&self.signature)?;
        crypto::verify_signature(&signee, self.block_hash.as_bytes(), &signature)
    }

    /// A genesis header anchors itself: parent and genesis hash are both
    /// the zero hash.
    pub fn verify_as_genesis(&self) -> ChainResult<()> {
        if self.header.parent_hash != self.header.genesis_hash {
            return Err(ChainError::Crypto(
                "genesis block must anchor itself".into(),
            ));
        }
        self.verify()
    }
}

/// A signed block carrying the hashes of the queries it acknowledges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub signed_header: SignedHeader,
    pub queries: Vec<Hash>,
}

impl Block {
    /// Skeleton for the next block to produce. Hash and signature are
    /// filled in by [`Block::pack_and_sign_block`].
    pub fn pending(producer: NodeId, signee: String, genesis_hash: Hash) -> Self {
        Self {
            signed_header: SignedHeader {
                header: Header {
                    version: BLOCK_VERSION,
                    producer,
                    genesis_hash,
                    parent_hash: genesis_hash,
                    merkle_root: Hash::default(),
                    timestamp: DateTime::<Utc>::MIN_UTC,
                },
                block_hash: Hash::default(),
                signee,
                signature: String::new(),
            },
            queries: Vec::new(),
        }
    }

    pub fn block_hash(&self) -> &Hash {
        &self.signed_header.block_hash
    }

    pub fn parent_hash(&self) -> &Hash {
        &self.signed_header.header.parent_hash
    }

    pub fn producer(&self) -> &NodeId {
        &self.signed_header.header.producer
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.signed_header.header.timestamp
    }

    pub fn query_merkle_root(&self) -> Hash {
        let mut leaves = self.queries.clone();
        compute_merkle_root(&mut leaves)
    }

    /// Records an acknowledged query into the pending block, once.
    pub fn push_acked_query(&mut self, header_hash: &Hash) {
        if !self.queries.contains(header_hash) {
            self.queries.push(*header_hash);
        }
    }

    /// Seals the block: recomputes the query merkle root and the block
    /// hash, then signs the hash with the producer key.
    pub fn pack_and_sign_block(&mut self, keypair: &Keypair) -> ChainResult<()> {
        self.signed_header.header.merkle_root = self.query_merkle_root();
        let block_hash = self.signed_header.header.compute_hash()?;
        let signature = crypto::sign_message(keypair, block_hash.as_bytes());
        self.signed_header.block_hash = block_hash;
        self.signed_header.signee = public_key_to_hex(&keypair.public);
        self.signed_header.signature = signature_to_hex(&signature);
        Ok(())
    }

    pub fn verify(&self) -> ChainResult<()> {
        if self.query_merkle_root() != self.signed_header.header.merkle_root {
            return Err(ChainError::Crypto("query merkle root mismatch".into()));
        }
        self.signed_header.verify()
    }

    pub fn verify_as_genesis(&self) -> ChainResult<()> {
        if !self.queries.is_empty() {
            return Err(ChainError::Crypto(
                "genesis block must not acknowledge queries".into(),
            ));
        }
        self.signed_header.verify_as_genesis()
    }

    pub fn to_bytes(&self) -> ChainResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> ChainResult<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::crypto::generate_keypair;

    fn sample_block(keypair: &Keypair) -> Block {
        let mut block = Block::pending(
            NodeId::from("producer-1"),
            public_key_to_hex(&keypair.public),
            Hash::default(),
        );
        block.signed_header.header.timestamp = Utc.timestamp_opt(1_500_000_000, 0).unwrap();
        block.pack_and_sign_block(keypair).expect("pack and sign");
        block
    }

    #[test]
    fn packed_block_verifies() {
        let keypair = generate_keypair();
        let block = sample_block(&keypair);
        block.verify().expect("verify");
        block.verify_as_genesis().expect("verify as genesis");
    }

    #[test]
    fn tampered_header_is_rejected() {
        let keypair = generate_keypair();
        let mut block = sample_block(&keypair);
        block.signed_header.header.producer = NodeId::from("intruder");
        assert!(block.verify().is_err());
    }

    #[test]
    fn missing_query_breaks_merkle_root() {
        let keypair = generate_keypair();
        let mut block = sample_block(&keypair);
        block.push_acked_query(&crypto::sha256(b"ack"));
        block.pack_and_sign_block(&keypair).expect("pack and sign");
        block.verify().expect("verify");
        block.queries.clear();
        assert!(block.verify().is_err());
    }

    #[test]
    fn non_anchored_block_fails_genesis_check() {
        let keypair = generate_keypair();
        let mut block = sample_block(&keypair);
        block.signed_header.header.parent_hash = crypto::sha256(b"parent");
        block.pack_and_sign_block(&keypair).expect("pack and sign");
        assert!(block.verify_as_genesis().is_err());
        block.verify().expect("still a valid non-genesis block");
    }

    #[test]
    fn push_acked_query_is_idempotent() {
        let keypair = generate_keypair();
        let mut block = sample_block(&keypair);
        let ack = crypto::sha256(b"ack");
        block.push_acked_query(&ack);
        block.push_acked_query(&ack);
        assert_eq!(block.queries, vec![ack]);
    }

    #[test]
    fn encoding_round_trip() {
        let keypair = generate_keypair();
        let block = sample_block(&keypair);
        let bytes = block.to_bytes().expect("encode");
        let decoded = Block::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, block);
    }
}
