use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A round identifier. Strictly positive per §4.3 (`StartRound`
/// precondition); round ids are independent keys with no ordering
/// guarantee relative to one another (§5).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoundId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The key under which a round's aggregated storage blob is committed to
/// the replicated log's FSM (§3, `Round Commitment`).
impl RoundId {
    pub fn commitment_key(self) -> String {
        format!("round_{}_results", self.0)
    }
}

/// A worker identifier, opaque to the core beyond equality/ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_id_commitment_key() {
        assert_eq!(RoundId(7).commitment_key(), "round_7_results");
    }

    #[test]
    fn round_id_roundtrips_through_string() {
        let id = RoundId(42);
        let parsed: RoundId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
