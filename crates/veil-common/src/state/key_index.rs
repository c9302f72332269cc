use serde::{Deserialize, Serialize};

/// One entry of the Key–Index Map (§3): the position a key was assigned
/// in the lexicographically sorted key list used to build the PIR shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIndexEntry {
    pub key: String,
    pub index: i32,
}
