//! Segment handoff observer.
//!
//! Long-running, crash-recoverable state machine that consumes handoff
//! notifications from the persisted log, publishes ready segments into the
//! serving target set, and retires their predecessors once every query-node
//! replica has caught up. Cleanup of the persisted log happens strictly in
//! per-partition submission order so multi-level compaction chains never
//! release out of order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use seekdb_core::{
    CollectionId, CoreError, CoreResult, HandoffConfig, PartitionId, SegmentDescriptor, SegmentId,
};

use crate::catalog::MetadataCatalog;
use crate::distribution::DistributionView;
use crate::retry;
use crate::store::{HandoffStore, HandoffWatchEvent, WatchEventKind};
use crate::target::{TargetRegistry, TargetSegment};

/// Participation state of a collection in segment handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionHandoffStatus {
    /// Handoff events are buffered but not yet acted upon.
    Registered,
    /// Handoff events are actively published.
    Started,
}

/// Lifecycle state of a tracked handoff event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffEventStatus {
    /// Descriptor stored, collection not yet started.
    Received,
    /// Descriptor published; release and cleanup pending.
    Triggered,
}

#[derive(Debug, Clone)]
struct HandoffEvent {
    segment: SegmentDescriptor,
    status: HandoffEventStatus,
}

#[derive(Default)]
struct ObserverState {
    collection_status: HashMap<CollectionId, CollectionHandoffStatus>,
    events: HashMap<SegmentId, HandoffEvent>,
    // partition id -> segment ids in first-seen order
    submit_orders: HashMap<PartitionId, Vec<SegmentId>>,
}

/// Coordinates segment handoff between the persisted event log, the serving
/// target set, and the observed query-node distribution.
pub struct HandoffObserver {
    store: Arc<dyn HandoffStore>,
    catalog: Arc<dyn MetadataCatalog>,
    dist: Arc<dyn DistributionView>,
    target: Arc<dyn TargetRegistry>,
    config: HandoffConfig,
    state: Arc<RwLock<ObserverState>>,
    shutdown: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

impl HandoffObserver {
    /// Creates an observer over the given collaborators.
    pub fn new(
        store: Arc<dyn HandoffStore>,
        catalog: Arc<dyn MetadataCatalog>,
        dist: Arc<dyn DistributionView>,
        target: Arc<dyn TargetRegistry>,
        config: HandoffConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            dist,
            target,
            config,
            state: Arc::new(RwLock::new(ObserverState::default())),
            shutdown: None,
            worker: None,
        }
    }

    /// Marks collections as participating in handoff; their events are
    /// buffered until [`start_handoff`](Self::start_handoff). Idempotent.
    pub fn register(&self, collection_ids: &[CollectionId]) {
        let mut state = self.state.write();
        for &collection_id in collection_ids {
            state
                .collection_status
                .insert(collection_id, CollectionHandoffStatus::Registered);
        }
    }

    /// Removes collections from handoff participation. Pending events for
    /// the collection become un-actionable and are later cleaned as ignored.
    pub fn unregister(&self, collection_ids: &[CollectionId]) {
        let mut state = self.state.write();
        for collection_id in collection_ids {
            state.collection_status.remove(collection_id);
        }
    }

    /// Transitions collections to active handoff, unblocking any buffered
    /// events on the next scheduling tick.
    pub fn start_handoff(&self, collection_ids: &[CollectionId]) {
        let mut state = self.state.write();
        for &collection_id in collection_ids {
            state
                .collection_status
                .insert(collection_id, CollectionHandoffStatus::Started);
        }
    }

    /// Returns the participation status of a collection.
    pub fn collection_status(&self, collection_id: CollectionId) -> Option<CollectionHandoffStatus> {
        self.state.read().collection_status.get(&collection_id).copied()
    }

    /// Returns the status of a tracked handoff event, if any.
    pub fn event_status(&self, segment_id: SegmentId) -> Option<HandoffEventStatus> {
        self.state
            .read()
            .events
            .get(&segment_id)
            .map(|event| event.status)
    }

    /// Returns a partition's pending submission order.
    pub fn submit_order(&self, partition_id: PartitionId) -> Vec<SegmentId> {
        self.state
            .read()
            .submit_orders
            .get(&partition_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replays stale persisted events, then spawns the scheduling loop.
    ///
    /// # Errors
    ///
    /// Fails when the persisted log cannot be loaded, a replayed record
    /// cannot be decoded, or the watch stream cannot be opened. These are
    /// fatal: operating without revision knowledge risks missing events.
    pub async fn start(&mut self) -> CoreResult<()> {
        if self.worker.is_some() {
            warn!("handoff observer already running");
            return Ok(());
        }

        info!("start reloading handoff events from the persisted log");
        let revision = self.consume_outdated_events().await?;
        info!(revision, "finished reloading handoff events");

        let watch_rx = self.store.watch(revision + 1).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = self.clone_for_worker();
        let handle = tokio::spawn(async move {
            worker.run(watch_rx, shutdown_rx).await;
        });

        self.shutdown = Some(shutdown_tx);
        self.worker = Some(handle);
        Ok(())
    }

    /// Signals the scheduling loop to exit and waits for it to finish.
    /// Repeated calls are no-ops.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    /// Loads every persisted record plus the log revision, and purges
    /// records left behind by an earlier process generation. Live segments
    /// are re-delivered by normal processing once the watch resumes past
    /// the returned revision.
    async fn consume_outdated_events(&self) -> CoreResult<i64> {
        let (records, revision) = self.store.load_with_revision().await.map_err(|err| {
            error!(error = %err, "failed to load handoff events from the persisted log");
            err
        })?;

        for (key, value) in records {
            let descriptor: SegmentDescriptor =
                serde_json::from_slice(&value).map_err(|err| {
                    error!(%key, error = %err, "failed to decode persisted handoff record");
                    CoreError::from(err)
                })?;
            let _ = self.clean_event(&descriptor).await;
        }

        Ok(revision)
    }

    fn clone_for_worker(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
            dist: Arc::clone(&self.dist),
            target: Arc::clone(&self.target),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            shutdown: None,
            worker: None,
        }
    }

    async fn run(
        self,
        mut watch_rx: mpsc::UnboundedReceiver<HandoffWatchEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(
            interval_ms = self.config.check_interval_ms,
            "segment handoff loop started"
        );
        let mut ticker = tokio::time::interval(self.config.check_interval());

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("segment handoff loop stopped");
                    return;
                }

                event = watch_rx.recv() => {
                    let Some(event) = event else {
                        error!("segment handoff loop exiting: watch stream closed");
                        return;
                    };
                    self.handle_watch_event(event).await;
                }

                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn handle_watch_event(&self, event: HandoffWatchEvent) {
        match event.kind {
            WatchEventKind::Put => {
                let descriptor = match serde_json::from_slice::<SegmentDescriptor>(&event.value) {
                    Ok(descriptor) => descriptor,
                    Err(err) => {
                        error!(key = %event.key, error = %err, "failed to decode handoff event");
                        return;
                    }
                };
                self.try_handoff(descriptor).await;
            }
            kind => {
                warn!(?kind, key = %event.key, "ignoring handoff log event");
            }
        }
    }

    /// One scheduling tick: re-evaluate every tracked event, then collect
    /// finished ones. Re-evaluation runs first so a segment that becomes
    /// releasable mid-tick is still collected in the same tick.
    async fn tick(&self) {
        let snapshot: Vec<HandoffEvent> = self.state.read().events.values().cloned().collect();

        for event in snapshot {
            match event.status {
                HandoffEventStatus::Received => self.try_handoff(event.segment).await,
                HandoffEventStatus::Triggered => self.try_release(&event.segment),
            }
        }

        self.try_clean().await;
    }

    /// Decides whether a notified segment is eligible for handoff and
    /// either buffers, publishes, or ignores it.
    async fn try_handoff(&self, segment: SegmentDescriptor) {
        let index_ids = segment.index_ids();
        info!(
            collection_id = %segment.collection_id,
            partition_id = %segment.partition_id,
            segment_id = %segment.segment_id,
            fake = segment.is_fake,
            ?index_ids,
            "trying segment handoff"
        );

        let ignored = {
            let mut state = self.state.write();
            let status = state.collection_status.get(&segment.collection_id).copied();
            let eligible = self.config.auto_handoff
                && status.is_some()
                && (segment.is_fake
                    || self
                        .catalog
                        .contain_any_index(segment.collection_id, &index_ids));

            if eligible {
                if !state.events.contains_key(&segment.segment_id) {
                    // First-seen order is captured exactly once, no matter
                    // how often the same event is retried
                    state
                        .submit_orders
                        .entry(segment.partition_id)
                        .or_default()
                        .push(segment.segment_id);
                }

                if status == Some(CollectionHandoffStatus::Registered) {
                    // Keep the event buffered until the collection is ready
                    state
                        .events
                        .entry(segment.segment_id)
                        .or_insert_with(|| HandoffEvent {
                            segment: segment.clone(),
                            status: HandoffEventStatus::Received,
                        });
                    return;
                }

                state.events.insert(
                    segment.segment_id,
                    HandoffEvent {
                        segment: segment.clone(),
                        status: HandoffEventStatus::Triggered,
                    },
                );

                if !segment.is_fake {
                    info!(segment_id = %segment.segment_id, "publishing segment to the target registry");
                    self.publish_segment(&segment);
                }
                false
            } else {
                true
            }
        };

        if ignored {
            info!(
                collection_id = %segment.collection_id,
                segment_id = %segment.segment_id,
                "handoff not eligible, cleaning event"
            );
            let _ = self.clean_event(&segment).await;
        }
    }

    /// Publishes the segment as a serving target, flattening its compaction
    /// lineage so release can retire exactly the leaf-level sources.
    fn publish_segment(&self, segment: &SegmentDescriptor) {
        let targets = self
            .target
            .segments_by_collection(segment.collection_id, segment.partition_id);
        let compaction_from = Self::flatten_sources(&targets, &segment.compaction_from);

        let record = TargetSegment::from_descriptor(segment, compaction_from.clone());
        self.target.handoff_segment(record, &compaction_from);
    }

    /// Resolves compaction sources against the current target set: a source
    /// that is itself a tracked compaction product expands to its own
    /// sources, flattening multi-generation chains into their leaves. The
    /// visited set keeps a malformed lineage cycle from looping forever.
    fn flatten_sources(targets: &[TargetSegment], direct: &[SegmentId]) -> Vec<SegmentId> {
        let by_id: HashMap<SegmentId, &TargetSegment> = targets
            .iter()
            .map(|target| (target.segment_id, target))
            .collect();

        let mut visited: HashSet<SegmentId> = HashSet::new();
        let mut sources: BTreeSet<SegmentId> = BTreeSet::new();
        let mut worklist: Vec<SegmentId> = direct.to_vec();

        while let Some(segment_id) = worklist.pop() {
            if !visited.insert(segment_id) {
                continue;
            }
            match by_id.get(&segment_id) {
                Some(tracked) if !tracked.compaction_from.is_empty() => {
                    worklist.extend(tracked.compaction_from.iter().copied());
                }
                _ => {
                    sources.insert(segment_id);
                }
            }
        }

        sources.into_iter().collect()
    }

    /// Retires a triggered segment's sources once the segment is confirmed
    /// loaded everywhere (or already superseded) and, for fake markers,
    /// every dependency has finished handoff.
    fn try_release(&self, segment: &SegmentDescriptor) {
        let loaded = self.is_sealed_loaded(segment)
            || !self.target.contains_segment(segment.segment_id);
        if !loaded {
            return;
        }

        // Fake segments are never published, so their parents' completion is
        // checked against the tracked events rather than the node views
        if segment.is_fake && !self.all_dependencies_handed_off(segment) {
            debug!(
                segment_id = %segment.segment_id,
                sources = ?segment.compaction_from,
                "fake segment release blocked: dependencies still in handoff"
            );
            return;
        }

        if segment.compaction_from.is_empty() {
            return;
        }

        info!(
            collection_id = %segment.collection_id,
            partition_id = %segment.partition_id,
            segment_id = %segment.segment_id,
            fake = segment.is_fake,
            sources = ?segment.compaction_from,
            "removing compaction source segments from target"
        );
        for &source in &segment.compaction_from {
            // Growing-to-sealed handoff shares one segment id between old
            // and new, so only compaction products remove sources by id
            if segment.created_by_compaction {
                self.target.remove_segment(source);
            }
        }
    }

    fn is_sealed_loaded(&self, segment: &SegmentDescriptor) -> bool {
        // Must be loaded as sealed in every replica, in case of handoff
        // between growing and sealed
        let nodes = self.dist.sealed_nodes(segment.segment_id);
        let replicas = self.catalog.replicas(segment.collection_id);
        let covered = replicas
            .iter()
            .filter(|replica| nodes.iter().any(|node| replica.contains_node(*node)))
            .count();
        covered == replicas.len()
    }

    fn all_dependencies_handed_off(&self, segment: &SegmentDescriptor) -> bool {
        let state = self.state.read();
        segment
            .compaction_from
            .iter()
            .all(|source| !state.events.contains_key(source))
    }

    fn is_fully_released(&self, segment: &SegmentDescriptor) -> bool {
        if !segment.created_by_compaction {
            return self.dist.growing_nodes(segment.segment_id).is_empty();
        }
        segment
            .compaction_from
            .iter()
            .all(|&source| self.dist.serving_nodes(source).is_empty())
    }

    /// Collects finished handoff events in per-partition submission order.
    /// A non-releasable head blocks everything behind it; stale order
    /// entries with no tracked event are trimmed.
    async fn try_clean(&self) {
        // Decide the releasable prefix of every queue under the lock, then
        // run the persisted deletions without it
        let plan: Vec<(PartitionId, Vec<Option<SegmentDescriptor>>)> = {
            let state = self.state.read();
            state
                .submit_orders
                .iter()
                .map(|(&partition_id, order)| {
                    let mut entries = Vec::new();
                    for segment_id in order {
                        match state.events.get(segment_id) {
                            None => entries.push(None),
                            Some(event) if self.is_fully_released(&event.segment) => {
                                entries.push(Some(event.segment.clone()));
                            }
                            Some(_) => break,
                        }
                    }
                    (partition_id, entries)
                })
                .collect()
        };

        for (partition_id, entries) in plan {
            let mut advance = 0usize;
            for entry in entries {
                match entry {
                    None => advance += 1,
                    Some(descriptor) => {
                        info!(
                            collection_id = %descriptor.collection_id,
                            partition_id = %descriptor.partition_id,
                            segment_id = %descriptor.segment_id,
                            fake = descriptor.is_fake,
                            "cleaning handoff event after handoff finished"
                        );
                        if self.clean_event(&descriptor).await.is_err() {
                            // Leave the event pending; a later tick retries
                            break;
                        }
                        self.state.write().events.remove(&descriptor.segment_id);
                        advance += 1;
                    }
                }
            }

            if advance > 0 {
                let mut state = self.state.write();
                if let Some(order) = state.submit_orders.get_mut(&partition_id) {
                    order.drain(..advance.min(order.len()));
                }
            }
        }
    }

    /// Deletes the persisted record for a segment with bounded retry.
    /// Failure leaves the record for a later tick or restart.
    async fn clean_event(&self, descriptor: &SegmentDescriptor) -> CoreResult<()> {
        let store = Arc::clone(&self.store);
        let result = retry::with_backoff(&self.config.clean_retry, || {
            let store = Arc::clone(&store);
            let descriptor = descriptor.clone();
            async move { store.remove(&descriptor).await }
        })
        .await;

        if let Err(ref err) = result {
            warn!(
                collection_id = %descriptor.collection_id,
                partition_id = %descriptor.partition_id,
                segment_id = %descriptor.segment_id,
                error = %err,
                "failed to clean handoff event from the persisted log"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seekdb_core::{IndexDescriptor, IndexId, NodeId, ReplicaId, RetryConfig};

    use crate::catalog::ReplicaDescriptor;
    use crate::memory::{MemoryCatalog, MemoryDistribution, MemoryHandoffStore, MemoryTargetRegistry};

    const COLLECTION: CollectionId = CollectionId::new(7);
    const PARTITION: PartitionId = PartitionId::new(70);
    const INDEX: IndexId = IndexId::new(500);

    struct Fixture {
        store: Arc<MemoryHandoffStore>,
        catalog: Arc<MemoryCatalog>,
        dist: Arc<MemoryDistribution>,
        target: Arc<MemoryTargetRegistry>,
        observer: HandoffObserver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryHandoffStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let dist = Arc::new(MemoryDistribution::new());
        let target = Arc::new(MemoryTargetRegistry::new());
        let config = HandoffConfig {
            auto_handoff: true,
            check_interval_ms: 20,
            clean_retry: RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                backoff_multiplier: 2.0,
                jitter_percent: 0.0,
            },
        };
        let observer = HandoffObserver::new(
            Arc::clone(&store) as Arc<dyn HandoffStore>,
            Arc::clone(&catalog) as Arc<dyn MetadataCatalog>,
            Arc::clone(&dist) as Arc<dyn DistributionView>,
            Arc::clone(&target) as Arc<dyn TargetRegistry>,
            config,
        );
        Fixture {
            store,
            catalog,
            dist,
            target,
            observer,
        }
    }

    fn indexed_segment(id: i64) -> SegmentDescriptor {
        let mut segment =
            SegmentDescriptor::new(SegmentId::new(id), COLLECTION, PARTITION);
        segment.indexes = vec![IndexDescriptor {
            index_id: INDEX,
            index_name: "embedding".to_string(),
        }];
        segment
    }

    fn target_segment(id: i64, compaction_from: &[i64]) -> TargetSegment {
        TargetSegment::from_descriptor(
            &indexed_segment(id),
            compaction_from.iter().map(|&id| SegmentId::new(id)).collect(),
        )
    }

    fn ids(raw: &[i64]) -> Vec<SegmentId> {
        raw.iter().map(|&id| SegmentId::new(id)).collect()
    }

    #[test]
    fn test_register_is_idempotent() {
        let fx = fixture();

        fx.observer.register(&[COLLECTION]);
        fx.observer.register(&[COLLECTION]);
        assert_eq!(
            fx.observer.collection_status(COLLECTION),
            Some(CollectionHandoffStatus::Registered)
        );

        fx.observer.start_handoff(&[COLLECTION]);
        assert_eq!(
            fx.observer.collection_status(COLLECTION),
            Some(CollectionHandoffStatus::Started)
        );

        fx.observer.unregister(&[COLLECTION]);
        assert_eq!(fx.observer.collection_status(COLLECTION), None);
    }

    #[tokio::test]
    async fn test_unregistered_collection_routes_to_cleanup() {
        let fx = fixture();
        let segment = indexed_segment(1);
        fx.store.put(&segment).unwrap();

        fx.observer.try_handoff(segment.clone()).await;

        assert_eq!(fx.observer.event_status(segment.segment_id), None);
        assert!(fx.observer.submit_order(PARTITION).is_empty());
        assert!(!fx.store.contains(&segment));
    }

    #[tokio::test]
    async fn test_missing_index_routes_to_cleanup() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);
        let segment = indexed_segment(1);
        fx.store.put(&segment).unwrap();

        // No index built in the catalog yet
        fx.observer.try_handoff(segment.clone()).await;

        assert_eq!(fx.observer.event_status(segment.segment_id), None);
        assert!(!fx.store.contains(&segment));
    }

    #[tokio::test]
    async fn test_fake_segment_skips_index_check_and_publish() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);

        let mut fake = SegmentDescriptor::new(SegmentId::new(9), COLLECTION, PARTITION);
        fake.is_fake = true;

        fx.observer.try_handoff(fake.clone()).await;

        assert_eq!(
            fx.observer.event_status(fake.segment_id),
            Some(HandoffEventStatus::Triggered)
        );
        // Fake markers are never individually published
        assert!(!fx.target.contains_segment(fake.segment_id));
    }

    #[tokio::test]
    async fn test_buffered_while_registered_then_published() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.catalog.add_index(COLLECTION, INDEX);
        let segment = indexed_segment(1);

        fx.observer.try_handoff(segment.clone()).await;
        assert_eq!(
            fx.observer.event_status(segment.segment_id),
            Some(HandoffEventStatus::Received)
        );
        assert!(!fx.target.contains_segment(segment.segment_id));

        // Collection becomes ready; the tick retries the buffered event
        fx.observer.start_handoff(&[COLLECTION]);
        fx.observer.try_handoff(segment.clone()).await;
        assert_eq!(
            fx.observer.event_status(segment.segment_id),
            Some(HandoffEventStatus::Triggered)
        );
        assert!(fx.target.contains_segment(segment.segment_id));
    }

    #[tokio::test]
    async fn test_submit_order_captured_exactly_once() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.catalog.add_index(COLLECTION, INDEX);

        let first = indexed_segment(1);
        let second = indexed_segment(2);
        fx.observer.try_handoff(first.clone()).await;
        fx.observer.try_handoff(second.clone()).await;
        // Redelivery must not duplicate the order entry
        fx.observer.try_handoff(first.clone()).await;

        assert_eq!(fx.observer.submit_order(PARTITION), ids(&[1, 2]));
    }

    #[tokio::test]
    async fn test_compaction_chain_flattening() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);
        fx.catalog.add_index(COLLECTION, INDEX);

        // A and B are leaf targets; S1 is a tracked compaction of [A, B]
        fx.target.insert_segment(target_segment(10, &[]));
        fx.target.insert_segment(target_segment(11, &[]));
        fx.target.insert_segment(target_segment(20, &[10, 11]));

        // S2 compacts [S1, C] while S1 is still a tracked target
        let mut segment = indexed_segment(30);
        segment.created_by_compaction = true;
        segment.compaction_from = ids(&[20, 12]);

        fx.observer.try_handoff(segment).await;

        let published = fx.target.get(SegmentId::new(30)).unwrap();
        assert_eq!(published.compaction_from, ids(&[10, 11, 12]));
    }

    #[tokio::test]
    async fn test_flattening_survives_lineage_cycles() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);
        fx.catalog.add_index(COLLECTION, INDEX);

        // Malformed chain: 20 and 21 reference each other
        fx.target.insert_segment(target_segment(20, &[21]));
        fx.target.insert_segment(target_segment(21, &[20]));

        let mut segment = indexed_segment(30);
        segment.created_by_compaction = true;
        segment.compaction_from = ids(&[20, 12]);

        // Must terminate; the cycle contributes no leaves
        fx.observer.try_handoff(segment).await;

        let published = fx.target.get(SegmentId::new(30)).unwrap();
        assert_eq!(published.compaction_from, ids(&[12]));
    }

    #[tokio::test]
    async fn test_release_waits_for_every_replica() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);
        fx.catalog.add_index(COLLECTION, INDEX);
        fx.catalog.set_replicas(
            COLLECTION,
            vec![
                ReplicaDescriptor {
                    replica_id: ReplicaId::new(1),
                    collection_id: COLLECTION,
                    nodes: vec![NodeId::new(1), NodeId::new(2)],
                },
                ReplicaDescriptor {
                    replica_id: ReplicaId::new(2),
                    collection_id: COLLECTION,
                    nodes: vec![NodeId::new(3), NodeId::new(4)],
                },
            ],
        );
        fx.target.insert_segment(target_segment(10, &[]));

        let mut segment = indexed_segment(100);
        segment.created_by_compaction = true;
        segment.compaction_from = ids(&[10]);
        fx.observer.try_handoff(segment.clone()).await;

        // Sealed on one replica only: not loaded everywhere yet
        fx.dist.set_sealed(segment.segment_id, &[NodeId::new(1)]);
        fx.observer.try_release(&segment);
        assert!(fx.target.contains_segment(SegmentId::new(10)));

        // Sealed on both replicas: sources retire
        fx.dist
            .set_sealed(segment.segment_id, &[NodeId::new(1), NodeId::new(3)]);
        fx.observer.try_release(&segment);
        assert!(!fx.target.contains_segment(SegmentId::new(10)));
        assert_eq!(fx.target.removed(), ids(&[10]));
    }

    #[tokio::test]
    async fn test_release_keeps_registry_for_non_compaction_handoff() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);
        fx.catalog.add_index(COLLECTION, INDEX);

        // Growing-to-sealed handoff: same id on both sides, not a compaction
        let mut segment = indexed_segment(100);
        segment.compaction_from = ids(&[10]);
        fx.observer.try_handoff(segment.clone()).await;

        // Loaded everywhere (no replicas configured means trivially covered)
        fx.observer.try_release(&segment);
        assert!(fx.target.removed().is_empty());
    }

    #[tokio::test]
    async fn test_fake_marker_release_blocked_by_tracked_dependency() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);
        fx.catalog.add_index(COLLECTION, INDEX);
        fx.target.insert_segment(target_segment(10, &[]));

        // Real dependency X, compacted from 10, still mid-handoff
        let mut dependency = indexed_segment(40);
        dependency.created_by_compaction = true;
        dependency.compaction_from = ids(&[10]);
        fx.observer.try_handoff(dependency.clone()).await;

        let mut fake = SegmentDescriptor::new(SegmentId::new(41), COLLECTION, PARTITION);
        fake.is_fake = true;
        fake.created_by_compaction = true;
        fake.compaction_from = ids(&[40]);
        fx.observer.try_handoff(fake.clone()).await;

        // Node views say 40 is evacuated, but its handoff event survives;
        // the marker must keep waiting
        fx.observer.try_release(&fake);
        assert!(fx.target.contains_segment(SegmentId::new(40)));

        // Dependency finishes handoff; the marker releases it
        fx.observer
            .state
            .write()
            .events
            .remove(&SegmentId::new(40));
        fx.observer.try_release(&fake);
        assert!(!fx.target.contains_segment(SegmentId::new(40)));
    }

    #[tokio::test]
    async fn test_clean_preserves_partition_order() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);
        fx.catalog.add_index(COLLECTION, INDEX);

        // A is still reported growing somewhere; B is fully released
        let first = indexed_segment(1);
        let second = indexed_segment(2);
        fx.store.put(&first).unwrap();
        fx.store.put(&second).unwrap();
        fx.dist.set_growing(first.segment_id, &[NodeId::new(1)]);

        fx.observer.try_handoff(first.clone()).await;
        fx.observer.try_handoff(second.clone()).await;

        fx.observer.try_clean().await;

        // The non-releasable head blocks everything behind it
        assert_eq!(
            fx.observer.event_status(second.segment_id),
            Some(HandoffEventStatus::Triggered)
        );
        assert!(fx.store.contains(&second));
        assert_eq!(fx.observer.submit_order(PARTITION), ids(&[1, 2]));

        // Head drains; the whole queue collects in order
        fx.dist.evacuate(first.segment_id);
        fx.observer.try_clean().await;
        assert_eq!(fx.observer.event_status(first.segment_id), None);
        assert_eq!(fx.observer.event_status(second.segment_id), None);
        assert!(fx.store.is_empty());
        assert!(fx.observer.submit_order(PARTITION).is_empty());
    }

    #[tokio::test]
    async fn test_clean_trims_stale_order_entries() {
        let fx = fixture();

        fx.observer
            .state
            .write()
            .submit_orders
            .insert(PARTITION, ids(&[99]));

        fx.observer.try_clean().await;
        assert!(fx.observer.submit_order(PARTITION).is_empty());
    }

    #[tokio::test]
    async fn test_clean_stops_on_persist_failure() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);
        fx.catalog.add_index(COLLECTION, INDEX);

        let segment = indexed_segment(1);
        fx.store.put(&segment).unwrap();
        fx.observer.try_handoff(segment.clone()).await;

        // Exhaust every retry attempt
        fx.store.fail_next_removes(3);
        fx.observer.try_clean().await;

        // Event and order entry stay pending for the next tick
        assert_eq!(
            fx.observer.event_status(segment.segment_id),
            Some(HandoffEventStatus::Triggered)
        );
        assert_eq!(fx.observer.submit_order(PARTITION), ids(&[1]));
        assert!(fx.store.contains(&segment));

        // Next tick succeeds
        fx.observer.try_clean().await;
        assert_eq!(fx.observer.event_status(segment.segment_id), None);
        assert!(!fx.store.contains(&segment));
    }

    #[tokio::test]
    async fn test_clean_event_retries_transient_failures() {
        let fx = fixture();
        let segment = indexed_segment(1);
        fx.store.put(&segment).unwrap();

        fx.store.fail_next_removes(2);
        fx.observer.clean_event(&segment).await.unwrap();
        assert!(!fx.store.contains(&segment));
    }

    #[tokio::test]
    async fn test_recovery_purges_and_is_idempotent() {
        let fx = fixture();
        let first = indexed_segment(1);
        let second = indexed_segment(2);
        fx.store.put(&first).unwrap();
        fx.store.put(&second).unwrap();

        let revision = fx.observer.consume_outdated_events().await.unwrap();
        assert_eq!(revision, 2);
        assert!(fx.store.is_empty());
        assert_eq!(fx.observer.event_status(first.segment_id), None);
        assert!(fx.target.removed().is_empty());

        // Replaying the now-empty snapshot is a no-op, not an error
        let revision = fx.observer.consume_outdated_events().await.unwrap();
        assert!(revision >= 2);
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_recovery_fails_on_undecodable_record() {
        let fx = fixture();
        fx.store
            .put_raw("coord-handoff/garbage", bytes::Bytes::from_static(b"not json"));

        // A decode failure during replay is fatal-at-startup
        assert!(fx.observer.consume_outdated_events().await.is_err());
    }

    #[tokio::test]
    async fn test_watch_decode_failure_is_skipped() {
        let fx = fixture();
        fx.observer.register(&[COLLECTION]);
        fx.observer.start_handoff(&[COLLECTION]);

        let event = HandoffWatchEvent {
            kind: WatchEventKind::Put,
            key: "coord-handoff/garbage".to_string(),
            value: bytes::Bytes::from_static(b"not json"),
        };
        fx.observer.handle_watch_event(event).await;

        // The malformed event is dropped without tracking anything
        assert!(fx.observer.submit_order(PARTITION).is_empty());
    }
}
