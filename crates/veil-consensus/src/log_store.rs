//! Sled-backed `RaftLogStorage`, grounded on openraft's own in-memory
//! `memstore` reference store: same trait surface, but the log and the
//! vote are persisted through `veil-common::db::tree::DbTree` instead of
//! an in-process `BTreeMap`, so a restarted node rejoins with its log
//! intact rather than replaying a full snapshot transfer every time.

use std::{
    fmt::Debug,
    ops::RangeBounds,
    sync::{Arc, Mutex},
};

use openraft::{
    storage::{IOFlushed, LogState, RaftLogReader, RaftLogStorage},
    LogId, OptionalSend, StorageError, StorageIOError, Vote,
};
use veil_common::db::tree::DbTree;

use crate::types::{NodeId, TypeConfig};

#[derive(Clone)]
pub struct LogStore {
    logs: Arc<DbTree<u64, openraft::Entry<TypeConfig>>>,
    meta: Arc<sled::Tree>,
    last_purged: Arc<Mutex<Option<LogId<NodeId>>>>,
}

const VOTE_KEY: &[u8] = b"vote";

impl LogStore {
    pub fn new(db: &sled::Db) -> Result<Self, sled::Error> {
        let logs = DbTree::new(db.open_tree("consensus/logs")?);
        let meta = db.open_tree("consensus/meta")?;
        Ok(Self {
            logs: Arc::new(logs),
            meta: Arc::new(meta),
            last_purged: Arc::new(Mutex::new(None)),
        })
    }

    fn io_err(e: impl std::error::Error + Send + Sync + 'static) -> StorageError<NodeId> {
        StorageIOError::write_logs(&e).into()
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<openraft::Entry<TypeConfig>>, StorageError<NodeId>> {
        let entries = self
            .logs
            .read_all()
            .filter(|(index, _)| range.contains(index))
            .map(|(_, entry)| entry)
            .collect();
        Ok(entries)
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let last_log_id = self
            .logs
            .read_all()
            .map(|(_, entry)| entry.log_id)
            .max_by_key(|id| (id.leader_id.term, id.index));

        let last_purged_log_id = self.last_purged.lock().unwrap().clone();

        Ok(LogState {
            last_purged_log_id,
            last_log_id: last_log_id.or(last_purged_log_id),
        })
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        let bytes = bincode::serialize(vote).map_err(Self::io_err)?;
        self.meta.insert(VOTE_KEY, bytes).map_err(Self::io_err)?;
        self.meta.flush().map_err(Self::io_err)?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        let Some(bytes) = self.meta.get(VOTE_KEY).map_err(Self::io_err)? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&bytes).map_err(Self::io_err)?))
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: IOFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = openraft::Entry<TypeConfig>> + Send,
    {
        for entry in entries {
            self.logs
                .save(&entry.log_id.index, &entry)
                .map_err(Self::io_err)?;
        }
        self.logs.flush().map_err(Self::io_err)?;
        callback.io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let stale: Vec<u64> = self
            .logs
            .read_all()
            .filter(|(index, _)| *index >= log_id.index)
            .map(|(index, _)| index)
            .collect();
        for index in stale {
            self.logs.delete(&index).map_err(Self::io_err)?;
        }
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let stale: Vec<u64> = self
            .logs
            .read_all()
            .filter(|(index, _)| *index <= log_id.index)
            .map(|(index, _)| index)
            .collect();
        for index in stale {
            self.logs.delete(&index).map_err(Self::io_err)?;
        }
        *self.last_purged.lock().unwrap() = Some(log_id);
        Ok(())
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn save_and_read_vote_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let mut store = LogStore::new(&db).unwrap();

        assert!(store.read_vote().await.unwrap().is_none());

        let vote = Vote::new(1, 7);
        store.save_vote(&vote).await.unwrap();
        assert_eq!(store.read_vote().await.unwrap(), Some(vote));
    }
}
