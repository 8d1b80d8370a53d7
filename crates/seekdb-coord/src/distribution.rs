use seekdb_core::{NodeId, SegmentId};

/// Observed, per-node actual serving state of segments.
///
/// All lookups return the empty set for unknown segments: a segment missing
/// from the view means "not currently served", a valid and common state.
pub trait DistributionView: Send + Sync {
    /// Nodes currently serving the segment as sealed.
    fn sealed_nodes(&self, segment_id: SegmentId) -> Vec<NodeId>;

    /// Nodes currently serving the segment as growing.
    fn growing_nodes(&self, segment_id: SegmentId) -> Vec<NodeId>;

    /// Nodes currently serving the segment in any state.
    fn serving_nodes(&self, segment_id: SegmentId) -> Vec<NodeId>;
}
