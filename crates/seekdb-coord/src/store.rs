//! Persisted handoff event log interface.
//!
//! The store is the durable, revisioned log of handoff notifications. The
//! coordinator consumes it three ways: an atomic load of every record plus
//! the log revision at startup, a live watch stream resumed from a known
//! revision, and idempotent record removal once a handoff has completed.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use seekdb_core::{CoreResult, SegmentDescriptor};

/// Key prefix under which handoff records are persisted.
pub const HANDOFF_KEY_PREFIX: &str = "coord-handoff";

/// Returns the persisted-log key for a segment's handoff record.
#[must_use]
pub fn handoff_event_key(descriptor: &SegmentDescriptor) -> String {
    format!(
        "{}/{}/{}/{}",
        HANDOFF_KEY_PREFIX,
        descriptor.collection_id,
        descriptor.partition_id,
        descriptor.segment_id
    )
}

/// Kind of a revisioned entry observed on the handoff log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A record was written or overwritten.
    Put,
    /// A record was removed.
    Delete,
}

/// A single revisioned entry delivered by the watch stream.
#[derive(Debug, Clone)]
pub struct HandoffWatchEvent {
    /// Entry kind.
    pub kind: WatchEventKind,
    /// Persisted-log key of the record.
    pub key: String,
    /// Serialized [`SegmentDescriptor`] payload (empty for deletes).
    pub value: Bytes,
}

/// Interface to the persisted, revisioned handoff event log.
#[async_trait]
pub trait HandoffStore: Send + Sync {
    /// Loads every persisted handoff record together with the log revision
    /// in one atomic read.
    async fn load_with_revision(&self) -> CoreResult<(Vec<(String, Bytes)>, i64)>;

    /// Streams log entries appended or deleted from `from_revision` onward.
    ///
    /// The returned channel closes when the store shuts down; consumers
    /// treat a closed stream as terminal.
    async fn watch(&self, from_revision: i64) -> CoreResult<UnboundedReceiver<HandoffWatchEvent>>;

    /// Removes the persisted record for a segment.
    ///
    /// Removing an absent key is not an error.
    async fn remove(&self, descriptor: &SegmentDescriptor) -> CoreResult<()>;
}
