//! Core crate implementing the sql-chain engine: an append-only,
//! block-structured ledger recording SQL query traffic.
//!
//! The `chain` module composes the building blocks into the engine that
//! verifies and records blocks and query headers and drives turn-based
//! block production. `blockindex` and `queryindex` hold the in-memory
//! views, `storage` the durable rocksdb-backed layout, and `runtime`
//! the coordinated chain clock. `types` defines the signed block and
//! query header structures exchanged with peers.
//!
//! Applications typically bootstrap through [`config::ChainConfig`] and
//! operate the ledger through [`chain::Chain`].

pub mod blockindex;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod queryindex;
pub mod runtime;
pub mod storage;
pub mod types;
