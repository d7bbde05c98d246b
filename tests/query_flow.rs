mod support;

use tempfile::tempdir;

use sqlchain::chain::Chain;
use sqlchain::errors::ChainError;
use support::{keypair_from_seed, make_ack, make_block, make_config, make_genesis, make_response};

#[test]
fn duplicate_ack_for_one_response_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let keypair = keypair_from_seed(1);
    let genesis = make_genesis(&keypair);
    let chain = Chain::new(make_config(dir.path(), genesis)).expect("new chain");

    let response = make_response(&keypair, 1, 1);
    chain
        .verify_and_push_responded_query(&response)
        .expect("push response");

    let first = make_ack(&keypair, &response, "client-1");
    let second = make_ack(&keypair, &response, "client-2");
    chain.verify_and_push_acked_query(&first).expect("push first ack");
    assert!(matches!(
        chain.verify_and_push_acked_query(&second),
        Err(ChainError::MultipleAcks)
    ));

    assert_eq!(chain.fetch_acked_query(1, &first.header_hash).unwrap(), first);
    assert!(matches!(
        chain.fetch_acked_query(1, &second.header_hash),
        Err(ChainError::AckNotFound)
    ));
}

#[test]
fn expired_query_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let keypair = keypair_from_seed(1);
    let genesis = make_genesis(&keypair);
    let mut cfg = make_config(dir.path(), genesis);
    cfg.query_ttl = 1;
    let chain = Chain::new(cfg).expect("new chain");

    // Next turn 5 with TTL 1 expires anything below height 4.
    for _ in 1..5 {
        chain.runtime().advance_turn();
    }
    assert_eq!(chain.runtime().next_turn(), 5);

    let response = make_response(&keypair, 3, 1);
    let stale_ack = make_ack(&keypair, &response, "client-1");
    assert!(matches!(
        chain.verify_and_push_acked_query(&stale_ack),
        Err(ChainError::QueryExpired)
    ));
    assert!(matches!(
        chain.verify_and_push_responded_query(&response),
        Err(ChainError::QueryExpired)
    ));

    let fresh = make_response(&keypair, 4, 2);
    chain
        .verify_and_push_responded_query(&fresh)
        .expect("fresh response is within the window");
}

#[test]
fn unsigned_query_is_rejected_before_storage() {
    let dir = tempdir().expect("tempdir");
    let keypair = keypair_from_seed(1);
    let genesis = make_genesis(&keypair);
    let chain = Chain::new(make_config(dir.path(), genesis)).expect("new chain");

    let mut response = make_response(&keypair, 1, 1);
    response.header.row_count += 1;
    assert!(matches!(
        chain.verify_and_push_responded_query(&response),
        Err(ChainError::Crypto(_))
    ));
    assert!(matches!(
        chain.fetch_responded_query(1, &response.header_hash),
        Err(ChainError::ResponseNotFound)
    ));
}

#[test]
fn own_turn_collects_acks_into_the_pending_block() {
    let dir = tempdir().expect("tempdir");
    let keypair = keypair_from_seed(1);
    let genesis = make_genesis(&keypair);
    let genesis_hash = *genesis.block_hash();
    let mut cfg = make_config(dir.path(), genesis);
    cfg.block_producer = true;
    let chain = Chain::new(cfg).expect("new chain");

    let response = make_response(&keypair, 1, 1);
    let ack = make_ack(&keypair, &response, "client-1");
    chain.verify_and_push_acked_query(&ack).expect("push ack");
    assert_eq!(chain.pending_queries(), vec![ack.header_hash]);

    chain
        .produce_block(genesis_hash, support::chain_init_time() + support::period())
        .expect("produce block");
    assert!(chain.pending_queries().is_empty());

    let produced = chain.fetch_block(1).expect("fetch").expect("block present");
    assert_eq!(produced.queries, vec![ack.header_hash]);
    assert!(chain
        .check_ack_from_block(1, produced.block_hash(), &ack.header_hash)
        .expect("check ack"));

    // The same ack claimed by a different block is an inclusion
    // conflict.
    let other = make_block(&keypair, genesis_hash, genesis_hash, 1, &[ack.header_hash]);
    assert!(matches!(
        chain.check_ack_from_block(1, other.block_hash(), &ack.header_hash),
        Err(ChainError::MultipleAcksInBlocks)
    ));
}

#[test]
fn reopened_store_restores_queries_and_state() {
    let dir = tempdir().expect("tempdir");
    let keypair = keypair_from_seed(1);
    let genesis = make_genesis(&keypair);
    let genesis_hash = *genesis.block_hash();
    let cfg = make_config(dir.path(), genesis);

    let response = make_response(&keypair, 1, 1);
    let ack = make_ack(&keypair, &response, "client-1");
    let (head, height, b1_hash) = {
        let chain = Chain::new(cfg.clone()).expect("new chain");
        chain
            .verify_and_push_responded_query(&response)
            .expect("push response");
        chain.verify_and_push_acked_query(&ack).expect("push ack");
        let b1 = make_block(&keypair, genesis_hash, genesis_hash, 1, &[ack.header_hash]);
        chain.check_and_push_new_block(&b1).expect("push block");
        (chain.head(), chain.height(), *b1.block_hash())
    };

    let reloaded = Chain::load(cfg).expect("load chain");
    assert_eq!(reloaded.head(), head);
    assert_eq!(reloaded.height(), height);

    let restored_ack = reloaded
        .fetch_acked_query(1, &ack.header_hash)
        .expect("ack restored");
    assert_eq!(restored_ack, ack);
    let restored_response = reloaded
        .fetch_responded_query(1, &response.header_hash)
        .expect("response restored");
    assert_eq!(restored_response, response);

    // Block membership survives the restart as well.
    assert!(reloaded
        .check_ack_from_block(1, &b1_hash, &ack.header_hash)
        .expect("check ack"));
    let fetched = reloaded.fetch_block(1).expect("fetch").expect("block present");
    assert_eq!(*fetched.block_hash(), b1_hash);
}
