//! Core domain types shared across the SeekDB query coordinator.

pub mod config;
pub mod error;
pub mod ids;
pub mod segment;

pub use config::{CoordConfig, HandoffConfig, RetryConfig};
pub use error::{CoreError, CoreResult};
pub use ids::{CollectionId, IndexId, NodeId, PartitionId, ReplicaId, SegmentId};
pub use segment::{IndexDescriptor, SegmentDescriptor, SegmentState};
