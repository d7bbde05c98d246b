use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cryptography error: {0}")]
    Crypto(String),
    #[error("parent block not found in index")]
    ParentNotFound,
    #[error("block does not extend the current chain head")]
    InvalidBlock,
    #[error("block already pushed")]
    BlockExists,
    #[error("block timestamp is out of the expected period")]
    BlockTimestampOutOfPeriod,
    #[error("another response is already recorded for this header hash")]
    MultipleResponses,
    #[error("response is already acknowledged by a different ack")]
    MultipleAcks,
    #[error("ack is already included in another block")]
    MultipleAcksInBlocks,
    #[error("ack not found at the queried height")]
    AckNotFound,
    #[error("response not found at the queried height")]
    ResponseNotFound,
    #[error("query timestamp is out of the tracked period window")]
    QueryExpired,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ChainResult<T> = Result<T, ChainError>;
