use frodo_pir::api::{BaseParams, Database};

use crate::error::PirError;

/// A built PIR shard for one completed round: the FrodoPIR database plus
/// the public base parameters clients need before they can query it.
/// Construction happens once, right after a round's aggregated pairs are
/// durably committed (§4.3 step 9), and the shard is reused for every
/// `get_value` call against that round.
pub struct PirShard {
    database: Database,
    base_params: BaseParams,
}

impl PirShard {
    /// Build a shard over `elements`, indexed by the Key–Index Map's
    /// `[0, N)` ordering (index `i` of `elements` must match
    /// `KeyIndexEntry { index: i, .. }`).
    pub fn build(elements: &[Vec<u8>], lwe_dim: usize, plaintext_bits: u8) -> Result<Self, PirError> {
        let elem_size = elements.iter().map(Vec::len).max().unwrap_or(1).max(1);
        let (database, base_params) =
            Database::new(lwe_dim, plaintext_bits as usize, elem_size, elements.to_vec())
                .map_err(|e| PirError::ShardBuildFailed(e.to_string()))?;
        Ok(Self {
            database,
            base_params,
        })
    }

    /// The blob handed back by `CoordinationService::get_base_params`.
    pub fn base_params_bytes(&self) -> Result<Vec<u8>, PirError> {
        Ok(bincode::serialize(&self.base_params)?)
    }

    /// Answer a client's opaque PIR query blob with an opaque response blob.
    /// The shard never learns which index the query targets.
    pub fn process_query(&self, query_bytes: &[u8]) -> Result<Vec<u8>, PirError> {
        let query = bincode::deserialize(query_bytes)?;
        let response = self
            .database
            .respond(&query)
            .map_err(|e| PirError::ShardBuildFailed(e.to_string()))?;
        Ok(bincode::serialize(&response)?)
    }
}
