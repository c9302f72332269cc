use frodo_pir::api::{BaseParams, QueryParams};

use crate::error::PirError;

/// A PIR client bound to one round's base parameters. `QueryParams` holds
/// the client's one-time secret coefficients: `frodo-pir` consumes them
/// when turning a response back into plaintext, so this wrapper tracks
/// that one-shot lifecycle explicitly rather than letting the underlying
/// crate panic on reuse (§9 "Supplemented detail", testable property #7).
pub struct PirClient {
    query_params: Option<QueryParams>,
}

impl PirClient {
    /// Expand a round's public base parameters (from `get_base_params`)
    /// into a fresh client with its own one-shot query secret. Expansion is
    /// the expensive half of FrodoPIR's offline phase; callers should cache
    /// the resulting `PirClient` per round rather than rebuilding it per
    /// query.
    pub fn new(base_params_bytes: &[u8]) -> Result<Self, PirError> {
        let base_params: BaseParams = bincode::deserialize(base_params_bytes)?;
        let common_params = base_params.expand();
        let query_params = QueryParams::new(&base_params, &common_params);
        Ok(Self {
            query_params: Some(query_params),
        })
    }

    /// Build an opaque query blob for `index`. May be called once per
    /// client; a second call after `decode_response` has consumed the
    /// secret returns `QueryParamsAlreadyUsed`.
    pub fn generate_query(&self, index: usize) -> Result<Vec<u8>, PirError> {
        let query_params = self
            .query_params
            .as_ref()
            .ok_or(PirError::QueryParamsAlreadyUsed)?;
        let query = query_params
            .prepare_query(index)
            .map_err(|_| PirError::ArithmeticOverflow)?;
        Ok(bincode::serialize(&query)?)
    }

    /// Recover the plaintext value for `index` out of the server's
    /// response blob. Consumes this client's one-shot secret; any further
    /// call returns `QueryParamsAlreadyUsed`.
    pub fn decode_response(&mut self, response_bytes: &[u8], index: usize) -> Result<Vec<u8>, PirError> {
        let query_params = self
            .query_params
            .take()
            .ok_or(PirError::QueryParamsAlreadyUsed)?;
        let response = bincode::deserialize(response_bytes)?;
        query_params
            .process_response(&response, index)
            .map_err(|e| PirError::DecodeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_generate_query_after_decode_fails() {
        // `PirClient` starts with a live `query_params`; after
        // `decode_response` consumes it, any further call is rejected
        // regardless of the bytes it's given. We can't exercise the
        // `frodo-pir` wire path without a real shard, so this checks the
        // lifecycle guard directly.
        let client = PirClient { query_params: None };
        assert!(matches!(
            client.generate_query(0),
            Err(PirError::QueryParamsAlreadyUsed)
        ));
    }
}
