use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CollectionId, IndexId, PartitionId, SegmentId};

/// Lifecycle state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentState {
    /// Mutable, actively-ingesting segment.
    Growing,
    /// Immutable, finalized segment ready for indexed serving.
    Sealed,
}

/// Index built over a segment's data, carried inside handoff notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Collection-level index this segment has been built against.
    pub index_id: IndexId,
    /// Human-readable index name.
    pub index_name: String,
}

/// Descriptor for a segment as delivered by handoff notifications.
///
/// Descriptors are immutable snapshots once stored: the coordinator never
/// mutates one after it has been admitted as a handoff event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// Stable segment identifier.
    pub segment_id: SegmentId,
    /// Owning collection identifier.
    pub collection_id: CollectionId,
    /// Owning partition identifier.
    pub partition_id: PartitionId,
    /// Number of rows persisted in the segment.
    pub row_count: u64,
    /// Ingestion channel the segment was written from.
    pub channel: String,
    /// Lifecycle state at notification time.
    pub state: SegmentState,
    /// Synthetic marker segment with no physical data, used purely to
    /// sequence release of real dependents.
    pub is_fake: bool,
    /// Whether the segment was produced by compaction.
    pub created_by_compaction: bool,
    /// Ordered list of source segments this one replaces.
    pub compaction_from: Vec<SegmentId>,
    /// Indexes available for the segment at notification time.
    pub indexes: Vec<IndexDescriptor>,
    /// Segment creation timestamp in UTC.
    pub created_at: DateTime<Utc>,
}

impl SegmentDescriptor {
    /// Creates a sealed descriptor with no lineage; callers fill in the
    /// remaining fields as needed.
    #[must_use]
    pub fn new(
        segment_id: SegmentId,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> Self {
        Self {
            segment_id,
            collection_id,
            partition_id,
            row_count: 0,
            channel: String::new(),
            state: SegmentState::Sealed,
            is_fake: false,
            created_by_compaction: false,
            compaction_from: Vec::new(),
            indexes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Returns the index IDs declared on the descriptor.
    #[must_use]
    pub fn index_ids(&self) -> Vec<IndexId> {
        self.indexes.iter().map(|index| index.index_id).collect()
    }
}
