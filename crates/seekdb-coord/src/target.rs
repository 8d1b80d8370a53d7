use serde::{Deserialize, Serialize};

use seekdb_core::{CollectionId, PartitionId, SegmentDescriptor, SegmentId, SegmentState};

/// A segment record published to the serving target set.
///
/// Unlike the raw [`SegmentDescriptor`] delivered by handoff notifications,
/// the target-side record carries the *flattened* compaction-source set so
/// release logic can retire exactly the leaf-level predecessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSegment {
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
    /// Lifecycle state at publish time.
    pub state: SegmentState,
    /// Whether the segment was produced by compaction.
    pub created_by_compaction: bool,
    /// Flattened set of source segments this one supersedes.
    pub compaction_from: Vec<SegmentId>,
}

impl TargetSegment {
    /// Builds a target record from a descriptor and a flattened source set.
    #[must_use]
    pub fn from_descriptor(descriptor: &SegmentDescriptor, compaction_from: Vec<SegmentId>) -> Self {
        Self {
            segment_id: descriptor.segment_id,
            collection_id: descriptor.collection_id,
            partition_id: descriptor.partition_id,
            row_count: descriptor.row_count,
            channel: descriptor.channel.clone(),
            state: descriptor.state,
            created_by_compaction: descriptor.created_by_compaction,
            compaction_from,
        }
    }
}

/// The desired/published set of segments query nodes should serve.
///
/// Implementations are in-process registries; operations are synchronous
/// and never block on I/O.
pub trait TargetRegistry: Send + Sync {
    /// Returns the segments currently registered as targets for the
    /// collection and partition.
    fn segments_by_collection(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> Vec<TargetSegment>;

    /// Registers a new serving target and tracks its sources as pending
    /// removal.
    fn handoff_segment(&self, segment: TargetSegment, sources: &[SegmentId]);

    /// Removes a segment from the target set.
    fn remove_segment(&self, segment_id: SegmentId);

    /// Returns true when the segment is registered as a target.
    fn contains_segment(&self, segment_id: SegmentId) -> bool;
}
