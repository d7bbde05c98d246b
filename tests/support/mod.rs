use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::{Keypair, PublicKey, SecretKey};

use sqlchain::config::ChainConfig;
use sqlchain::crypto::public_key_to_hex;
use sqlchain::types::{
    AckHeader, Block, Hash, NodeId, QueryType, RequestHeader, ResponseHeader, SignedAckHeader,
    SignedRequestHeader, SignedResponseHeader,
};

pub const PERIOD_MS: u64 = 1_000;

pub fn chain_init_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_500_000_000, 0).unwrap()
}

pub fn period() -> Duration {
    Duration::milliseconds(PERIOD_MS as i64)
}

pub fn keypair_from_seed(seed: u8) -> Keypair {
    let secret = SecretKey::from_bytes(&[seed; 32]).expect("secret from seed");
    let public = PublicKey::from(&secret);
    Keypair { secret, public }
}

pub fn make_genesis(keypair: &Keypair) -> Block {
    let mut genesis = Block::pending(
        NodeId::from("producer-0"),
        public_key_to_hex(&keypair.public),
        Hash::default(),
    );
    genesis.signed_header.header.timestamp = chain_init_time();
    genesis.pack_and_sign_block(keypair).expect("sign genesis");
    genesis
}

/// Signed block at `height`, timestamped to the start of its period.
pub fn make_block(
    keypair: &Keypair,
    genesis_hash: Hash,
    parent: Hash,
    height: i32,
    queries: &[Hash],
) -> Block {
    let mut block = Block::pending(
        NodeId::from("producer-1"),
        public_key_to_hex(&keypair.public),
        genesis_hash,
    );
    block.signed_header.header.parent_hash = parent;
    block.signed_header.header.timestamp = chain_init_time() + period() * height;
    for query in queries {
        block.push_acked_query(query);
    }
    block.pack_and_sign_block(keypair).expect("sign block");
    block
}

pub fn make_config(root: &Path, genesis: Block) -> ChainConfig {
    ChainConfig {
        data_dir: root.join("db"),
        key_path: root.join("keys").join("node.toml"),
        server_id: NodeId::from("node-1"),
        period_ms: PERIOD_MS,
        time_resolution_ms: 100,
        query_ttl: 10,
        block_producer: false,
        genesis: Some(genesis),
    }
}

/// Signed response whose wrapped request is timestamped into `height`.
pub fn make_response(keypair: &Keypair, height: i32, seq_no: u64) -> SignedResponseHeader {
    let timestamp = chain_init_time() + period() * height;
    let request = SignedRequestHeader::pack_and_sign(
        RequestHeader {
            query_type: QueryType::Write,
            node_id: NodeId::from("client-1"),
            connection_id: 1,
            seq_no,
            batch_count: 1,
            timestamp,
        },
        keypair,
    )
    .expect("sign request");
    SignedResponseHeader::pack_and_sign(
        ResponseHeader {
            request,
            node_id: NodeId::from("miner-1"),
            row_count: 1,
            timestamp: timestamp + Duration::milliseconds(5),
        },
        keypair,
    )
    .expect("sign response")
}

pub fn make_ack(
    keypair: &Keypair,
    response: &SignedResponseHeader,
    node: &str,
) -> SignedAckHeader {
    SignedAckHeader::pack_and_sign(
        AckHeader {
            response: response.clone(),
            node_id: NodeId::from(node),
            timestamp: response.header.timestamp + Duration::milliseconds(5),
        },
        keypair,
    )
    .expect("sign ack")
}
