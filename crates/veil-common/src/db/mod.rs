pub mod tree;

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error("failed to encode value for storage: {0}")]
    Encode(#[from] bincode::Error),
}

/// Opens (or creates) a sled database at `path` with a standard layout.
/// Grounded on `common/src/db/tree.rs`'s database-open pattern, generalized
/// so each crate that needs persistence (`veil-round`'s round-commitment
/// cache, `veil-consensus`'s log/snapshot store) can open its own tree
/// namespace out of the same `sled::Db`.
pub fn open(path: &Path) -> Result<sled::Db, DatabaseError> {
    Ok(sled::open(path)?)
}
