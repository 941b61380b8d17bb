//! Persisted record layout
//!
//! Each component persists into its own backend table. Record values are
//! MessagePack structs; document field data inside them is Value Codec
//! bytes. Integer parts of row keys are big endian so rows sort by id.
//!
//! | Table | Row key | Value |
//! |-------|---------|-------|
//! | `documents` | document path | [`DocumentRecord`] |
//! | `mutations` | user, batch id | [`BatchRecord`] |
//! | `mutation_queues` | user | [`QueueRecord`] |
//! | `targets` | target id | [`TargetRecord`] |
//! | `target_documents` | target id, document path | [`TargetDocumentRecord`] |
//! | `target_globals` | `globals` | [`TargetGlobalsRecord`] |
//! | `collection_parents` | collection id, parent path | [`CollectionParentRecord`] |
//! | `lru_stamps` | document path | [`StampRecord`] |
//! | `globals` | name | raw bytes |

use crate::delegate::ReferenceDelegate;
use crate::state::LocalState;
use byteorder::{BigEndian, WriteBytesExt};
use chrono::{DateTime, Utc};
use docsync_core::{
    BatchId, Document, DocumentKey, Error, FieldPath, ListenSequenceNumber, Mutation, MutationBatch,
    Query, ResourcePath, Result, SnapshotVersion, TargetId, User,
};
use docsync_storage::{Change, TargetData, TargetGlobals, WriteBatch};
use docsync_wire::{decode_object, encode_object};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub(crate) const DOCUMENTS: &str = "documents";
pub(crate) const MUTATIONS: &str = "mutations";
pub(crate) const MUTATION_QUEUES: &str = "mutation_queues";
pub(crate) const TARGETS: &str = "targets";
pub(crate) const TARGET_DOCUMENTS: &str = "target_documents";
pub(crate) const TARGET_GLOBALS: &str = "target_globals";
pub(crate) const COLLECTION_PARENTS: &str = "collection_parents";
pub(crate) const LRU_STAMPS: &str = "lru_stamps";
pub(crate) const GLOBALS: &str = "globals";

pub(crate) const TARGET_GLOBALS_KEY: &[u8] = b"globals";
pub(crate) const SESSION_TOKEN_KEY: &[u8] = b"session_token";
pub(crate) const INSTALLATION_ID_KEY: &[u8] = b"installation_id";

pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(record)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

fn key_from_segments(segments: Vec<String>) -> Result<DocumentKey> {
    DocumentKey::from_path(ResourcePath::from_segments(segments)?)
}

// ============================================================================
// Row keys
// ============================================================================

fn path_row(key: &DocumentKey) -> Vec<u8> {
    key.path().canonical_string().into_bytes()
}

const USER_UNAUTHENTICATED: u8 = 0;
const USER_AUTHENTICATED: u8 = 1;

fn user_row(user: &User) -> Result<Vec<u8>> {
    let Some(uid) = user.uid() else {
        return Ok(vec![USER_UNAUTHENTICATED]);
    };
    let uid = uid.as_bytes();
    let len = u16::try_from(uid.len())
        .map_err(|_| Error::InvalidInput(format!("user id of {} bytes is too long", uid.len())))?;
    let mut row = Vec::with_capacity(3 + uid.len());
    row.write_u8(USER_AUTHENTICATED)?;
    row.write_u16::<BigEndian>(len)?;
    row.extend_from_slice(uid);
    Ok(row)
}

fn batch_row(user: &User, batch_id: BatchId) -> Result<Vec<u8>> {
    let mut row = user_row(user)?;
    row.write_i32::<BigEndian>(batch_id)?;
    Ok(row)
}

fn target_row(target_id: TargetId) -> Result<Vec<u8>> {
    let mut row = Vec::with_capacity(4);
    row.write_i32::<BigEndian>(target_id)?;
    Ok(row)
}

fn target_document_row(target_id: TargetId, key: &DocumentKey) -> Result<Vec<u8>> {
    let mut row = target_row(target_id)?;
    row.extend_from_slice(&path_row(key));
    Ok(row)
}

fn collection_parent_row(collection_id: &str, parent: &ResourcePath) -> Result<Vec<u8>> {
    let len = u16::try_from(collection_id.len())
        .map_err(|_| Error::InvalidInput(format!("collection id {:?} is too long", collection_id)))?;
    let mut row = Vec::new();
    row.write_u16::<BigEndian>(len)?;
    row.extend_from_slice(collection_id.as_bytes());
    row.extend_from_slice(parent.canonical_string().as_bytes());
    Ok(row)
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DocumentRecord {
    path: Vec<String>,
    version: i64,
    data: Option<Vec<u8>>,
    has_local_mutations: bool,
}

impl DocumentRecord {
    pub(crate) fn from_document(document: &Document) -> Result<Self> {
        Ok(Self {
            path: document.key().path().segments().to_vec(),
            version: document.version().micros(),
            data: document.data().map(encode_object).transpose()?,
            has_local_mutations: document.has_local_mutations(),
        })
    }

    pub(crate) fn into_document(self) -> Result<Document> {
        let key = key_from_segments(self.path)?;
        let version = SnapshotVersion::from_micros(self.version);
        let document = match self.data {
            Some(bytes) => Document::found(key, version, decode_object(&bytes)?),
            None => Document::deleted(key, version),
        };
        Ok(if self.has_local_mutations {
            document.with_local_mutations()
        } else {
            document
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum MutationRecord {
    Set {
        path: Vec<String>,
        value: Vec<u8>,
    },
    Patch {
        path: Vec<String>,
        value: Vec<u8>,
        mask: Vec<Vec<String>>,
    },
    Delete {
        path: Vec<String>,
    },
}

impl MutationRecord {
    fn from_mutation(mutation: &Mutation) -> Result<Self> {
        let path = mutation.key().path().segments().to_vec();
        Ok(match mutation {
            Mutation::Set { value, .. } => MutationRecord::Set {
                path,
                value: encode_object(value)?,
            },
            Mutation::Patch { value, mask, .. } => MutationRecord::Patch {
                path,
                value: encode_object(value)?,
                mask: mask.iter().map(|f| f.segments().to_vec()).collect(),
            },
            Mutation::Delete { .. } => MutationRecord::Delete { path },
        })
    }

    fn into_mutation(self) -> Result<Mutation> {
        Ok(match self {
            MutationRecord::Set { path, value } => Mutation::Set {
                key: key_from_segments(path)?,
                value: decode_object(&value)?,
            },
            MutationRecord::Patch { path, value, mask } => Mutation::Patch {
                key: key_from_segments(path)?,
                value: decode_object(&value)?,
                mask: mask.into_iter().map(FieldPath::from_segments).collect(),
            },
            MutationRecord::Delete { path } => Mutation::Delete {
                key: key_from_segments(path)?,
            },
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BatchRecord {
    pub(crate) user: User,
    batch_id: BatchId,
    local_write_time: DateTime<Utc>,
    mutations: Vec<MutationRecord>,
    stream_token: Option<Vec<u8>>,
}

impl BatchRecord {
    fn from_batch(user: &User, batch: &MutationBatch) -> Result<Self> {
        Ok(Self {
            user: user.clone(),
            batch_id: batch.batch_id(),
            local_write_time: batch.local_write_time(),
            mutations: batch
                .mutations()
                .iter()
                .map(MutationRecord::from_mutation)
                .collect::<Result<Vec<_>>>()?,
            stream_token: batch.stream_token().map(<[u8]>::to_vec),
        })
    }

    pub(crate) fn into_batch(self) -> Result<(User, MutationBatch)> {
        let mutations = self
            .mutations
            .into_iter()
            .map(MutationRecord::into_mutation)
            .collect::<Result<Vec<_>>>()?;
        let mut batch = MutationBatch::new(self.batch_id, self.local_write_time, mutations);
        if let Some(token) = self.stream_token {
            batch.set_stream_token(token);
        }
        Ok((self.user, batch))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct QueueRecord {
    pub(crate) user: User,
    pub(crate) last_stream_token: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TargetRecord {
    target_id: TargetId,
    path: Vec<String>,
    collection_group: Option<String>,
    sequence_number: ListenSequenceNumber,
    snapshot_version: i64,
    resume_token: Vec<u8>,
}

impl TargetRecord {
    fn from_target(target: &TargetData) -> Self {
        Self {
            target_id: target.target_id,
            path: target.query.path().segments().to_vec(),
            collection_group: target.query.collection_group_id().map(str::to_owned),
            sequence_number: target.sequence_number,
            snapshot_version: target.snapshot_version.micros(),
            resume_token: target.resume_token.clone(),
        }
    }

    pub(crate) fn into_target(self) -> Result<TargetData> {
        let query = match self.collection_group {
            Some(group) => Query::collection_group(group),
            None => Query::at_path(ResourcePath::from_segments(self.path)?),
        };
        Ok(TargetData {
            target_id: self.target_id,
            query,
            sequence_number: self.sequence_number,
            snapshot_version: SnapshotVersion::from_micros(self.snapshot_version),
            resume_token: self.resume_token,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TargetDocumentRecord {
    pub(crate) target_id: TargetId,
    path: Vec<String>,
}

impl TargetDocumentRecord {
    pub(crate) fn key(self) -> Result<DocumentKey> {
        key_from_segments(self.path)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TargetGlobalsRecord {
    highest_target_id: TargetId,
    highest_listen_sequence_number: ListenSequenceNumber,
    last_remote_snapshot_version: i64,
}

impl TargetGlobalsRecord {
    fn from_globals(globals: TargetGlobals) -> Self {
        Self {
            highest_target_id: globals.highest_target_id,
            highest_listen_sequence_number: globals.highest_listen_sequence_number,
            last_remote_snapshot_version: globals.last_remote_snapshot_version.micros(),
        }
    }

    pub(crate) fn into_globals(self) -> TargetGlobals {
        TargetGlobals {
            highest_target_id: self.highest_target_id,
            highest_listen_sequence_number: self.highest_listen_sequence_number,
            last_remote_snapshot_version: SnapshotVersion::from_micros(self.last_remote_snapshot_version),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CollectionParentRecord {
    pub(crate) collection_id: String,
    parent: Vec<String>,
}

impl CollectionParentRecord {
    pub(crate) fn parent(self) -> Result<(String, ResourcePath)> {
        Ok((self.collection_id, ResourcePath::from_segments(self.parent)?))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StampRecord {
    path: Vec<String>,
    pub(crate) sequence_number: ListenSequenceNumber,
}

impl StampRecord {
    pub(crate) fn key(&self) -> Result<DocumentKey> {
        key_from_segments(self.path.clone())
    }
}

// ============================================================================
// Commit
// ============================================================================

/// Rows ready to persist, plus the first value that could not be encoded
pub(crate) struct CollectedChanges {
    pub(crate) batch: WriteBatch,
    pub(crate) rejected: Option<Error>,
}

fn reject(rejected: &mut Option<Error>, table: &str, error: Error) {
    warn!(target: "docsync::persistence", table, %error, "Row left out of commit");
    rejected.get_or_insert(error);
}

/// Drains every component's dirty set into one write batch
///
/// Documents and mutation batches whose field values cannot be encoded are
/// left out; every other row is still collected.
pub(crate) fn collect_changes(
    state: &mut LocalState,
    delegate: &mut dyn ReferenceDelegate,
) -> Result<CollectedChanges> {
    let mut batch = WriteBatch::new();
    let mut rejected = None;

    for (key, change) in state.document_cache.take_changes() {
        let row = path_row(&key);
        match (change, state.document_cache.get(&key)) {
            (Change::Upsert, Some(doc)) => match DocumentRecord::from_document(&doc) {
                Ok(record) => batch.put(DOCUMENTS, row, encode(&record)?),
                Err(e) => reject(&mut rejected, DOCUMENTS, e),
            },
            _ => batch.delete(DOCUMENTS, row),
        }
    }

    for (user, queue) in state.mutation_queues.iter_mut() {
        for (batch_id, change) in queue.take_changes() {
            let row = batch_row(user, batch_id)?;
            match (change, queue.lookup(batch_id)) {
                (Change::Upsert, Some(b)) => match BatchRecord::from_batch(user, b) {
                    Ok(record) => batch.put(MUTATIONS, row, encode(&record)?),
                    Err(e) => reject(&mut rejected, MUTATIONS, e),
                },
                _ => batch.delete(MUTATIONS, row),
            }
        }
        if queue.take_metadata_dirty() {
            let record = QueueRecord {
                user: user.clone(),
                last_stream_token: queue.last_stream_token().to_vec(),
            };
            batch.put(MUTATION_QUEUES, user_row(user)?, encode(&record)?);
        }
    }

    let targets = &mut state.target_cache;
    for (target_id, change) in targets.take_target_changes() {
        let row = target_row(target_id)?;
        match (change, targets.target_by_id(target_id)) {
            (Change::Upsert, Some(t)) => batch.put(TARGETS, row, encode(&TargetRecord::from_target(t))?),
            _ => batch.delete(TARGETS, row),
        }
    }
    for ((target_id, key), change) in targets.take_reference_changes() {
        let row = target_document_row(target_id, &key)?;
        match change {
            Change::Upsert => {
                let record = TargetDocumentRecord {
                    target_id,
                    path: key.path().segments().to_vec(),
                };
                batch.put(TARGET_DOCUMENTS, row, encode(&record)?);
            }
            Change::Remove => batch.delete(TARGET_DOCUMENTS, row),
        }
    }
    if targets.take_globals_dirty() {
        let record = TargetGlobalsRecord::from_globals(targets.globals());
        batch.put(TARGET_GLOBALS, TARGET_GLOBALS_KEY, encode(&record)?);
    }

    for ((collection_id, parent), change) in state.index_manager.take_changes() {
        let row = collection_parent_row(&collection_id, &parent)?;
        match change {
            Change::Upsert => {
                let record = CollectionParentRecord {
                    parent: parent.segments().to_vec(),
                    collection_id,
                };
                batch.put(COLLECTION_PARENTS, row, encode(&record)?);
            }
            Change::Remove => batch.delete(COLLECTION_PARENTS, row),
        }
    }

    if state.globals_cache.take_dirty() {
        batch.put(GLOBALS, SESSION_TOKEN_KEY, state.globals_cache.session_token());
    }

    for (key, change, sequence_number) in delegate.take_stamp_changes() {
        let row = path_row(&key);
        match change {
            Change::Upsert => {
                let record = StampRecord {
                    path: key.path().segments().to_vec(),
                    sequence_number,
                };
                batch.put(LRU_STAMPS, row, encode(&record)?);
            }
            Change::Remove => batch.delete(LRU_STAMPS, row),
        }
    }

    Ok(CollectedChanges { batch, rejected })
}

/// Drops every dirty set without building records
pub(crate) fn discard_changes(state: &mut LocalState, delegate: &mut dyn ReferenceDelegate) {
    state.document_cache.take_changes();
    for queue in state.mutation_queues.values_mut() {
        queue.take_changes();
        queue.take_metadata_dirty();
    }
    state.target_cache.take_target_changes();
    state.target_cache.take_reference_changes();
    state.target_cache.take_globals_dirty();
    state.index_manager.take_changes();
    state.globals_cache.take_dirty();
    delegate.take_stamp_changes();
}
