//! Reference delegates
//!
//! A reference delegate decides when a cached document may be dropped. Two
//! policies exist and are chosen when the persistence instance is built:
//!
//! - [`EagerReferenceDelegate`]: documents that lose their last reference
//!   are deleted when the transaction commits
//! - [`LruReferenceDelegate`]: touched documents are stamped with the
//!   current listen sequence number and left for the garbage collector
//!
//! Every call receives the [`LocalState`] it works on. A delegate is owned by
//! its persistence instance and holds no handle back to it.

mod eager;
mod lru;

pub use eager::EagerReferenceDelegate;
pub use lru::LruReferenceDelegate;

use crate::state::LocalState;
use docsync_core::{DocumentKey, ListenSequenceNumber, TargetId};
use docsync_storage::Change;

/// Reachability tracking for cached documents
pub trait ReferenceDelegate: Send {
    /// A target or local view started referencing `key`
    fn add_reference(&mut self, state: &mut LocalState, key: &DocumentKey);

    /// A target or local view stopped referencing `key`
    fn remove_reference(&mut self, state: &mut LocalState, key: &DocumentKey);

    /// A mutation batch writing `key` left the queue
    fn remove_mutation_reference(&mut self, state: &mut LocalState, key: &DocumentKey);

    /// A document the client is unsure about (limbo) was updated
    fn update_limbo_document(&mut self, state: &mut LocalState, key: &DocumentKey);

    /// The target is no longer listened to
    fn remove_target(&mut self, state: &mut LocalState, target_id: TargetId);

    /// Sequence number of the running transaction
    fn current_sequence_number(&self) -> ListenSequenceNumber;

    fn on_transaction_started(&mut self, state: &mut LocalState, label: &str);

    fn on_transaction_committed(&mut self, state: &mut LocalState);

    fn name(&self) -> &'static str;

    /// The LRU delegate, if this is one
    fn as_lru(&mut self) -> Option<&mut LruReferenceDelegate> {
        None
    }

    /// Last-touch stamps changed since the last call
    fn take_stamp_changes(&mut self) -> Vec<(DocumentKey, Change, ListenSequenceNumber)> {
        Vec::new()
    }

    /// Installs a persisted last-touch stamp
    fn restore_stamp(&mut self, _key: &DocumentKey, _sequence_number: ListenSequenceNumber) {}
}
