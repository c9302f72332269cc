//! The applied key/value state itself, plus snapshotting. Grounded on
//! openraft's `memstore` `StateMachineStore`: entries apply in order into a
//! flat key/value map (here, a sled tree rather than a `BTreeMap`), and a
//! snapshot is just a full serialization of that map plus the membership
//! and log-id it was taken at.

use std::{
    io::Cursor,
    sync::{Arc, Mutex},
};

use openraft::{
    storage::{RaftStateMachine, Snapshot},
    EntryPayload, LogId, OptionalSend, RaftSnapshotBuilder, SnapshotMeta, StorageError,
    StorageIOError, StoredMembership,
};
use serde::{Deserialize, Serialize};
use veil_common::db::tree::DbTree;

use crate::types::{AppRequest, AppResponse, NodeId, TypeConfig};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SnapshotState {
    data: Vec<(String, Vec<u8>)>,
    last_applied: Option<LogId<NodeId>>,
    membership: StoredMembership<NodeId, openraft::BasicNode>,
}

pub struct StateMachineStore {
    kv: Arc<DbTree<String, Vec<u8>>>,
    last_applied: Arc<Mutex<Option<LogId<NodeId>>>>,
    membership: Arc<Mutex<StoredMembership<NodeId, openraft::BasicNode>>>,
    current_snapshot: Arc<Mutex<Option<SnapshotState>>>,
    snapshot_idx: Arc<Mutex<u64>>,
}

impl StateMachineStore {
    pub fn new(db: &sled::Db) -> Result<Self, sled::Error> {
        let kv = DbTree::new(db.open_tree("consensus/state")?);
        Ok(Self {
            kv: Arc::new(kv),
            last_applied: Arc::new(Mutex::new(None)),
            membership: Arc::new(Mutex::new(StoredMembership::default())),
            current_snapshot: Arc::new(Mutex::new(None)),
            snapshot_idx: Arc::new(Mutex::new(0)),
        })
    }

    /// Read a committed key out of the state machine. Used by
    /// `ConsensusNode::get` (§4.2: "reads are served from the local applied
    /// state, not routed through consensus").
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.kv.restore(&key.to_string()).ok().flatten()
    }

    fn io_err(e: impl std::error::Error + Send + Sync + 'static) -> StorageError<NodeId> {
        StorageIOError::write(&e).into()
    }
}

impl RaftSnapshotBuilder<TypeConfig> for StateMachineStore {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let data: Vec<(String, Vec<u8>)> = self.kv.read_all().collect();
        let last_applied = self.last_applied.lock().unwrap().clone();
        let membership = self.membership.lock().unwrap().clone();

        let snapshot = SnapshotState {
            data,
            last_applied: last_applied.clone(),
            membership: membership.clone(),
        };
        let bytes = bincode::serialize(&snapshot).map_err(Self::io_err)?;

        let mut idx = self.snapshot_idx.lock().unwrap();
        *idx += 1;
        let snapshot_id = match &last_applied {
            Some(id) => format!("{}-{}-{}", id.leader_id.term, id.index, idx),
            None => format!("empty-{idx}"),
        };
        drop(idx);

        *self.current_snapshot.lock().unwrap() = Some(snapshot.clone());

        Ok(Snapshot {
            meta: SnapshotMeta {
                last_log_id: last_applied,
                last_membership: membership,
                snapshot_id,
            },
            snapshot: Box::new(Cursor::new(bytes)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for StateMachineStore {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, openraft::BasicNode>), StorageError<NodeId>>
    {
        Ok((
            self.last_applied.lock().unwrap().clone(),
            self.membership.lock().unwrap().clone(),
        ))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<AppResponse>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = openraft::Entry<TypeConfig>> + OptionalSend,
    {
        let mut responses = Vec::new();
        for entry in entries {
            *self.last_applied.lock().unwrap() = Some(entry.log_id);
            match entry.payload {
                EntryPayload::Blank => {
                    responses.push(AppResponse {
                        key: String::new(),
                    });
                }
                EntryPayload::Normal(AppRequest::Set { key, value }) => {
                    self.kv.save(&key, &value).map_err(Self::io_err)?;
                    responses.push(AppResponse { key });
                }
                EntryPayload::Normal(AppRequest::Delete { key }) => {
                    self.kv.delete(&key).map_err(Self::io_err)?;
                    responses.push(AppResponse { key });
                }
                EntryPayload::Membership(membership) => {
                    *self.membership.lock().unwrap() =
                        StoredMembership::new(Some(entry.log_id), membership);
                    responses.push(AppResponse {
                        key: String::new(),
                    });
                }
            }
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        Self {
            kv: self.kv.clone(),
            last_applied: self.last_applied.clone(),
            membership: self.membership.clone(),
            current_snapshot: self.current_snapshot.clone(),
            snapshot_idx: self.snapshot_idx.clone(),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, openraft::BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let state: SnapshotState =
            bincode::deserialize(snapshot.get_ref()).map_err(Self::io_err)?;

        for (key, _) in self.kv.read_all() {
            self.kv.delete(&key).map_err(Self::io_err)?;
        }
        for (key, value) in &state.data {
            self.kv.save(key, value).map_err(Self::io_err)?;
        }

        *self.last_applied.lock().unwrap() = meta.last_log_id;
        *self.membership.lock().unwrap() = meta.last_membership.clone();
        *self.current_snapshot.lock().unwrap() = Some(state);
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let Some(state) = self.current_snapshot.lock().unwrap().clone() else {
            return Ok(None);
        };
        let bytes = bincode::serialize(&state).map_err(Self::io_err)?;
        let idx = *self.snapshot_idx.lock().unwrap();
        let snapshot_id = match &state.last_applied {
            Some(id) => format!("{}-{}-{}", id.leader_id.term, id.index, idx),
            None => format!("empty-{idx}"),
        };
        Ok(Some(Snapshot {
            meta: SnapshotMeta {
                last_log_id: state.last_applied,
                last_membership: state.membership,
                snapshot_id,
            },
            snapshot: Box::new(Cursor::new(bytes)),
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn apply_set_entry_updates_kv() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let mut sm = StateMachineStore::new(&db).unwrap();

        let entry = openraft::Entry {
            log_id: LogId::new(openraft::CommittedLeaderId::new(1, 0), 1),
            payload: EntryPayload::Normal(AppRequest::Set {
                key: "round_1_results".into(),
                value: vec![1, 2, 3],
            }),
        };
        let responses = sm.apply(vec![entry]).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(sm.get("round_1_results"), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn apply_delete_entry_removes_kv() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let mut sm = StateMachineStore::new(&db).unwrap();

        let set_entry = openraft::Entry {
            log_id: LogId::new(openraft::CommittedLeaderId::new(1, 0), 1),
            payload: EntryPayload::Normal(AppRequest::Set {
                key: "round_1_results".into(),
                value: vec![1, 2, 3],
            }),
        };
        sm.apply(vec![set_entry]).await.unwrap();
        assert!(sm.get("round_1_results").is_some());

        let delete_entry = openraft::Entry {
            log_id: LogId::new(openraft::CommittedLeaderId::new(1, 0), 2),
            payload: EntryPayload::Normal(AppRequest::Delete {
                key: "round_1_results".into(),
            }),
        };
        sm.apply(vec![delete_entry]).await.unwrap();
        assert_eq!(sm.get("round_1_results"), None);
    }
}
