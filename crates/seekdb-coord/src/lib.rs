//! SeekDB query-coordinator segment handoff.
//!
//! When a growing segment is sealed or several segments are compacted into a
//! new one, query nodes must switch from serving the old segment(s) to the
//! replacement without ever serving neither or both. The
//! [`HandoffObserver`] drives that switch: it consumes handoff notifications
//! from a persisted revisioned log, publishes eligible segments into the
//! serving target set, retires superseded predecessors once every replica
//! has caught up, and durably removes processed notifications only after
//! that is certain.

pub mod catalog;
pub mod distribution;
pub mod memory;
pub mod observer;
pub mod retry;
pub mod store;
pub mod target;

pub use catalog::{MetadataCatalog, ReplicaDescriptor};
pub use distribution::DistributionView;
pub use memory::{MemoryCatalog, MemoryDistribution, MemoryHandoffStore, MemoryTargetRegistry};
pub use observer::{CollectionHandoffStatus, HandoffEventStatus, HandoffObserver};
pub use store::{handoff_event_key, HandoffStore, HandoffWatchEvent, WatchEventKind};
pub use target::{TargetRegistry, TargetSegment};
