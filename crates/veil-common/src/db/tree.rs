//! A typed wrapper over a `sled::Tree`, grounded on
//! `common/src/db/tree.rs`'s `DbTree<K, V>`: corrupt rows are logged and
//! skipped rather than poisoning the whole scan, matching the teacher's
//! `tracing::error!`-and-continue behavior. Unlike the teacher, keys and
//! values are encoded with plain `bincode` rather than a hand-rolled
//! versioned `DataFormat` — nothing in this system needs the teacher's
//! forward-compatible on-disk migration machinery.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

use super::DatabaseError;

pub struct DbTree<K, V> {
    tree: sled::Tree,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> DbTree<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    pub fn new(tree: sled::Tree) -> Self {
        Self {
            tree,
            _phantom: PhantomData,
        }
    }

    pub fn read_all(&self) -> impl Iterator<Item = (K, V)> + '_ {
        self.tree.iter().filter_map(|row| {
            let (key_bytes, value_bytes) = match row {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("error reading row from store: {e}");
                    return None;
                }
            };

            let key = match bincode::deserialize(&key_bytes) {
                Ok(key) => key,
                Err(e) => {
                    tracing::error!("error parsing key from store: {e}");
                    return None;
                }
            };

            let value = match bincode::deserialize(&value_bytes) {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!("error parsing value from store: {e}");
                    return None;
                }
            };

            Some((key, value))
        })
    }

    pub fn restore(&self, key: &K) -> Result<Option<V>, DatabaseError> {
        Ok(self
            .tree
            .get(bincode::serialize(key)?)?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()?)
    }

    pub fn save(&self, key: &K, value: &V) -> Result<(), DatabaseError> {
        self.tree
            .insert(bincode::serialize(key)?, bincode::serialize(value)?)?;
        Ok(())
    }

    pub fn save_option(&self, key: &K, value: Option<&V>) -> Result<(), DatabaseError> {
        match value {
            Some(value) => self.save(key, value),
            None => self.delete(key).map(|_| ()),
        }
    }

    pub fn delete(&self, key: &K) -> Result<bool, DatabaseError> {
        Ok(self.tree.remove(bincode::serialize(key)?)?.is_some())
    }

    pub fn flush(&self) -> Result<usize, DatabaseError> {
        Ok(self.tree.flush()?)
    }
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Value {
        n: u32,
        s: String,
    }

    #[test]
    fn save_restore_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let tree: DbTree<String, Value> = DbTree::new(db.open_tree(b"v1/test").unwrap());

        let key = "hello".to_string();
        let value = Value {
            n: 7,
            s: "world".into(),
        };

        assert_eq!(tree.restore(&key).unwrap(), None);
        tree.save(&key, &value).unwrap();
        assert_eq!(tree.restore(&key).unwrap(), Some(value));
        assert!(tree.delete(&key).unwrap());
        assert_eq!(tree.restore(&key).unwrap(), None);
    }
}
