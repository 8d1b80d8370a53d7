use serde::{Deserialize, Serialize};

use seekdb_core::{CollectionId, IndexId, NodeId, ReplicaId};

/// Replica group of query nodes serving a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    /// Stable replica identifier.
    pub replica_id: ReplicaId,
    /// Collection this replica serves.
    pub collection_id: CollectionId,
    /// Query nodes assigned to the replica.
    pub nodes: Vec<NodeId>,
}

impl ReplicaDescriptor {
    /// Returns true when the node belongs to this replica.
    #[must_use]
    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.contains(&node_id)
    }
}

/// Read-only view of collection and replica metadata.
///
/// Implementations are in-process views over coordinator metadata; lookups
/// are synchronous and never block on I/O.
pub trait MetadataCatalog: Send + Sync {
    /// Returns true when the collection has built at least one of the given
    /// indexes.
    fn contain_any_index(&self, collection_id: CollectionId, index_ids: &[IndexId]) -> bool;

    /// Returns all replicas serving the collection.
    fn replicas(&self, collection_id: CollectionId) -> Vec<ReplicaDescriptor>;
}
