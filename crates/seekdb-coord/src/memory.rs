//! In-memory implementations of the coordinator's external collaborators.
//!
//! These back the test suite and embedded single-process deployments. The
//! handoff store keeps a full revision history so watches can resume from
//! any revision, mirroring the semantics of a persisted revisioned log.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use seekdb_core::{
    CollectionId, CoreError, CoreResult, IndexId, NodeId, PartitionId, SegmentDescriptor,
    SegmentId,
};

use crate::catalog::{MetadataCatalog, ReplicaDescriptor};
use crate::distribution::DistributionView;
use crate::store::{handoff_event_key, HandoffStore, HandoffWatchEvent, WatchEventKind};
use crate::target::{TargetRegistry, TargetSegment};

#[derive(Default)]
struct StoreInner {
    records: BTreeMap<String, Bytes>,
    revision: i64,
    history: Vec<(i64, HandoffWatchEvent)>,
    watchers: Vec<UnboundedSender<HandoffWatchEvent>>,
    fail_removes: u32,
}

impl StoreInner {
    fn broadcast(&mut self, event: &HandoffWatchEvent) {
        self.watchers
            .retain(|watcher| watcher.send(event.clone()).is_ok());
    }
}

/// In-memory revisioned handoff log.
pub struct MemoryHandoffStore {
    inner: RwLock<StoreInner>,
}

impl MemoryHandoffStore {
    /// Constructs an empty store at revision zero.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Appends or overwrites the handoff record for a segment, bumping the
    /// log revision and notifying live watchers.
    pub fn put(&self, descriptor: &SegmentDescriptor) -> CoreResult<()> {
        let value = Bytes::from(serde_json::to_vec(descriptor)?);
        let key = handoff_event_key(descriptor);

        let mut inner = self.inner.write();
        inner.revision += 1;
        inner.records.insert(key.clone(), value.clone());

        let event = HandoffWatchEvent {
            kind: WatchEventKind::Put,
            key,
            value,
        };
        let revision = inner.revision;
        inner.history.push((revision, event.clone()));
        inner.broadcast(&event);
        Ok(())
    }

    /// Appends a raw record without going through descriptor
    /// serialization; lets tests exercise decode-failure paths.
    pub fn put_raw(&self, key: impl Into<String>, value: Bytes) {
        let key = key.into();
        let mut inner = self.inner.write();
        inner.revision += 1;
        inner.records.insert(key.clone(), value.clone());

        let event = HandoffWatchEvent {
            kind: WatchEventKind::Put,
            key,
            value,
        };
        let revision = inner.revision;
        inner.history.push((revision, event.clone()));
        inner.broadcast(&event);
    }

    /// Returns true when a record for the segment is persisted.
    pub fn contains(&self, descriptor: &SegmentDescriptor) -> bool {
        self.inner
            .read()
            .records
            .contains_key(&handoff_event_key(descriptor))
    }

    /// Number of persisted records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Returns true when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes the next `count` removals fail with a storage error.
    pub fn fail_next_removes(&self, count: u32) {
        self.inner.write().fail_removes = count;
    }

    /// Drops every live watcher, closing their streams.
    pub fn close_watchers(&self) {
        self.inner.write().watchers.clear();
    }
}

impl Default for MemoryHandoffStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HandoffStore for MemoryHandoffStore {
    async fn load_with_revision(&self) -> CoreResult<(Vec<(String, Bytes)>, i64)> {
        let inner = self.inner.read();
        let records = inner
            .records
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok((records, inner.revision))
    }

    async fn watch(&self, from_revision: i64) -> CoreResult<UnboundedReceiver<HandoffWatchEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write();
        for (revision, event) in &inner.history {
            if *revision >= from_revision {
                // Receiver is still in scope, the send cannot fail
                let _ = tx.send(event.clone());
            }
        }
        inner.watchers.push(tx);
        Ok(rx)
    }

    async fn remove(&self, descriptor: &SegmentDescriptor) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if inner.fail_removes > 0 {
            inner.fail_removes -= 1;
            return Err(CoreError::storage("injected remove failure"));
        }

        let key = handoff_event_key(descriptor);
        if inner.records.remove(&key).is_some() {
            inner.revision += 1;
            let event = HandoffWatchEvent {
                kind: WatchEventKind::Delete,
                key,
                value: Bytes::new(),
            };
            let revision = inner.revision;
            inner.history.push((revision, event.clone()));
            inner.broadcast(&event);
        }
        Ok(())
    }
}

#[derive(Default)]
struct CatalogInner {
    indexes: HashMap<CollectionId, HashSet<IndexId>>,
    replicas: HashMap<CollectionId, Vec<ReplicaDescriptor>>,
}

/// In-memory collection and replica metadata.
pub struct MemoryCatalog {
    inner: RwLock<CatalogInner>,
}

impl MemoryCatalog {
    /// Constructs an empty catalog.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner::default()),
        }
    }

    /// Records a built index for a collection.
    pub fn add_index(&self, collection_id: CollectionId, index_id: IndexId) {
        self.inner
            .write()
            .indexes
            .entry(collection_id)
            .or_default()
            .insert(index_id);
    }

    /// Replaces the replica set of a collection.
    pub fn set_replicas(&self, collection_id: CollectionId, replicas: Vec<ReplicaDescriptor>) {
        self.inner.write().replicas.insert(collection_id, replicas);
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCatalog for MemoryCatalog {
    fn contain_any_index(&self, collection_id: CollectionId, index_ids: &[IndexId]) -> bool {
        let inner = self.inner.read();
        match inner.indexes.get(&collection_id) {
            Some(built) => index_ids.iter().any(|index_id| built.contains(index_id)),
            None => false,
        }
    }

    fn replicas(&self, collection_id: CollectionId) -> Vec<ReplicaDescriptor> {
        self.inner
            .read()
            .replicas
            .get(&collection_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct DistributionInner {
    sealed: HashMap<SegmentId, BTreeSet<NodeId>>,
    growing: HashMap<SegmentId, BTreeSet<NodeId>>,
}

/// In-memory per-node serving state.
pub struct MemoryDistribution {
    inner: RwLock<DistributionInner>,
}

impl MemoryDistribution {
    /// Constructs an empty view.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DistributionInner::default()),
        }
    }

    /// Replaces the set of nodes serving the segment as sealed.
    pub fn set_sealed(&self, segment_id: SegmentId, nodes: &[NodeId]) {
        self.inner
            .write()
            .sealed
            .insert(segment_id, nodes.iter().copied().collect());
    }

    /// Replaces the set of nodes serving the segment as growing.
    pub fn set_growing(&self, segment_id: SegmentId, nodes: &[NodeId]) {
        self.inner
            .write()
            .growing
            .insert(segment_id, nodes.iter().copied().collect());
    }

    /// Drops the segment from every node's serving sets.
    pub fn evacuate(&self, segment_id: SegmentId) {
        let mut inner = self.inner.write();
        inner.sealed.remove(&segment_id);
        inner.growing.remove(&segment_id);
    }
}

impl Default for MemoryDistribution {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributionView for MemoryDistribution {
    fn sealed_nodes(&self, segment_id: SegmentId) -> Vec<NodeId> {
        self.inner
            .read()
            .sealed
            .get(&segment_id)
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }

    fn growing_nodes(&self, segment_id: SegmentId) -> Vec<NodeId> {
        self.inner
            .read()
            .growing
            .get(&segment_id)
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }

    fn serving_nodes(&self, segment_id: SegmentId) -> Vec<NodeId> {
        let inner = self.inner.read();
        let mut nodes: BTreeSet<NodeId> = BTreeSet::new();
        if let Some(sealed) = inner.sealed.get(&segment_id) {
            nodes.extend(sealed.iter().copied());
        }
        if let Some(growing) = inner.growing.get(&segment_id) {
            nodes.extend(growing.iter().copied());
        }
        nodes.into_iter().collect()
    }
}

#[derive(Default)]
struct TargetInner {
    segments: HashMap<SegmentId, TargetSegment>,
    pending_release: HashSet<SegmentId>,
    removed: Vec<SegmentId>,
}

/// In-memory serving target set.
pub struct MemoryTargetRegistry {
    inner: RwLock<TargetInner>,
}

impl MemoryTargetRegistry {
    /// Constructs an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TargetInner::default()),
        }
    }

    /// Seeds a segment into the target set without tracking sources.
    pub fn insert_segment(&self, segment: TargetSegment) {
        self.inner
            .write()
            .segments
            .insert(segment.segment_id, segment);
    }

    /// Returns the registered record for a segment, if any.
    pub fn get(&self, segment_id: SegmentId) -> Option<TargetSegment> {
        self.inner.read().segments.get(&segment_id).cloned()
    }

    /// Source segments currently tracked as pending removal, sorted.
    pub fn pending_release(&self) -> Vec<SegmentId> {
        let mut pending: Vec<SegmentId> =
            self.inner.read().pending_release.iter().copied().collect();
        pending.sort();
        pending
    }

    /// Segments removed from the target set, in removal order.
    pub fn removed(&self) -> Vec<SegmentId> {
        self.inner.read().removed.clone()
    }
}

impl Default for MemoryTargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetRegistry for MemoryTargetRegistry {
    fn segments_by_collection(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> Vec<TargetSegment> {
        self.inner
            .read()
            .segments
            .values()
            .filter(|segment| {
                segment.collection_id == collection_id && segment.partition_id == partition_id
            })
            .cloned()
            .collect()
    }

    fn handoff_segment(&self, segment: TargetSegment, sources: &[SegmentId]) {
        let mut inner = self.inner.write();
        inner.pending_release.extend(sources.iter().copied());
        inner.segments.insert(segment.segment_id, segment);
    }

    fn remove_segment(&self, segment_id: SegmentId) {
        let mut inner = self.inner.write();
        inner.segments.remove(&segment_id);
        inner.pending_release.remove(&segment_id);
        inner.removed.push(segment_id);
    }

    fn contains_segment(&self, segment_id: SegmentId) -> bool {
        self.inner.read().segments.contains_key(&segment_id)
    }
}
