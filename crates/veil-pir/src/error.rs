use thiserror::Error;

#[derive(Debug, Error)]
pub enum PirError {
    #[error("failed to build PIR shard: {0}")]
    ShardBuildFailed(String),
    #[error("PIR query generation overflowed, retry with fresh randomness")]
    ArithmeticOverflow,
    #[error("key not present in this round's key-index map")]
    KeyNotInMap,
    #[error("query params were already consumed by a prior decode_response call")]
    QueryParamsAlreadyUsed,
    #[error("PIR response failed to decode: {0}")]
    DecodeFailed(String),
    #[error("failed to (de)serialize PIR parameters: {0}")]
    Encoding(#[from] bincode::Error),
}
