use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::queue::{PendingEmbeddingUpdate, PopResult, UpdateQueue};
use crate::config::{PipelineConfig, TuningSettings};
use crate::error::Result;
use crate::recognition::{FlatIpIndex, IdentityIndex, ResolutionCache};
use crate::storage::{EmbeddingKind, Store};
use crate::utils::metrics::Metrics;

/// Rebuilds the identity index from every active embedding in the store,
/// swaps it in and invalidates the resolution cache. Returns the new index
/// size; an empty store leaves the current index in place and returns 0.
pub fn rebuild_index(
    store: &dyn Store,
    index: &IdentityIndex,
    cache: &ResolutionCache,
    metrics: &Metrics,
) -> Result<usize> {
    let embeddings = store.active_embeddings()?;
    if embeddings.is_empty() {
        warn!("No active embeddings in the store, identity index left unchanged");
        return Ok(0);
    }

    let rebuilt = FlatIpIndex::build(embeddings.into_iter().map(|e| (e.identity, e.embedding)))?;
    let size = rebuilt.len();
    index.replace(rebuilt);
    cache.clear();
    metrics.record_index_rebuild(size);

    info!(size, "Identity index rebuilt");
    Ok(size)
}

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub batch_size: usize,
    pub poll: Duration,
    pub batch_flush: Duration,
    pub idle_flush: Duration,
    pub rebuild_after: usize,
}

impl MaintenanceSettings {
    pub fn new(config: &PipelineConfig, tuning: &TuningSettings) -> Self {
        Self {
            batch_size: config.update_batch_size.max(1),
            poll: config.update_poll(),
            batch_flush: config.batch_flush(),
            idle_flush: config.idle_flush(),
            rebuild_after: tuning.max_updates_before_rebuild.max(1),
        }
    }
}

/// Background consumer of the update queue: persists confident embeddings
/// in batches and periodically rebuilds the identity index from the store.
pub struct EmbeddingMaintenanceWorker {
    queue: Arc<UpdateQueue>,
    store: Arc<dyn Store>,
    index: Arc<IdentityIndex>,
    cache: Arc<ResolutionCache>,
    metrics: Arc<Metrics>,
    settings: MaintenanceSettings,
    persisted_since_rebuild: AtomicUsize,
}

impl EmbeddingMaintenanceWorker {
    pub fn new(
        queue: Arc<UpdateQueue>,
        store: Arc<dyn Store>,
        index: Arc<IdentityIndex>,
        cache: Arc<ResolutionCache>,
        metrics: Arc<Metrics>,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            queue,
            store,
            index,
            cache,
            metrics,
            settings,
            persisted_since_rebuild: AtomicUsize::new(0),
        }
    }

    pub fn spawn(self: Arc<Self>) -> Result<JoinHandle<()>> {
        Ok(thread::Builder::new()
            .name("embedding-maintenance".to_string())
            .spawn(move || self.run())?)
    }

    /// Runs until the queue is closed and drained. Whatever is batched is
    /// flushed before returning.
    pub fn run(&self) {
        info!("Embedding maintenance worker started");
        let mut batch: Vec<PendingEmbeddingUpdate> = Vec::with_capacity(self.settings.batch_size);
        let mut last_flush = Instant::now();

        loop {
            match self.queue.pop_timeout(self.settings.poll) {
                PopResult::Item(update) => {
                    batch.push(update);
                    if batch.len() >= self.settings.batch_size
                        || last_flush.elapsed() >= self.settings.batch_flush
                    {
                        self.flush(&mut batch);
                        last_flush = Instant::now();
                    }
                }
                PopResult::Timeout => {
                    if !batch.is_empty() && last_flush.elapsed() >= self.settings.idle_flush {
                        self.flush(&mut batch);
                        last_flush = Instant::now();
                    }
                }
                PopResult::Closed => break,
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch);
        }
        info!("Embedding maintenance worker stopped");
    }

    fn flush(&self, batch: &mut Vec<PendingEmbeddingUpdate>) {
        let mut persisted = 0;
        for update in batch.drain(..) {
            match self.persist(&update) {
                Ok(true) => persisted += 1,
                Ok(false) => warn!(identity = %update.identity, "Skipping update for unknown user"),
                Err(e) => error!(identity = %update.identity, "Failed to persist embedding update: {}", e),
            }
        }
        debug!(persisted, "Flushed embedding updates");

        let total = self.persisted_since_rebuild.fetch_add(persisted, Ordering::SeqCst) + persisted;
        if total >= self.settings.rebuild_after {
            match rebuild_index(self.store.as_ref(), &self.index, &self.cache, &self.metrics) {
                Ok(_) => self.persisted_since_rebuild.store(0, Ordering::SeqCst),
                Err(e) => error!("Identity index rebuild failed: {}", e),
            }
        }
    }

    fn persist(&self, update: &PendingEmbeddingUpdate) -> Result<bool> {
        let Some(user) = self.store.find_user(&update.identity)? else {
            return Ok(false);
        };
        self.store
            .add_face_embedding(user.user_id, &update.embedding, EmbeddingKind::Update)?;
        Ok(true)
    }

    pub fn persisted_since_rebuild(&self) -> usize {
        self.persisted_since_rebuild.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::Resolution;
    use crate::storage::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<UpdateQueue>,
        index: Arc<IdentityIndex>,
        cache: Arc<ResolutionCache>,
        metrics: Arc<Metrics>,
        worker: Arc<EmbeddingMaintenanceWorker>,
    }

    fn fixture(rebuild_after: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user("E1", "Ada");
        store.add_face_embedding(user, &[1.0, 0.0], EmbeddingKind::Enrollment).unwrap();

        let queue = Arc::new(UpdateQueue::new(200));
        let index = Arc::new(IdentityIndex::default());
        let cache = Arc::new(ResolutionCache::new(500));
        let metrics = Arc::new(Metrics::new().unwrap());
        let settings = MaintenanceSettings {
            batch_size: 5,
            poll: Duration::from_millis(20),
            batch_flush: Duration::from_secs(5),
            idle_flush: Duration::from_millis(50),
            rebuild_after,
        };
        let worker = Arc::new(EmbeddingMaintenanceWorker::new(
            Arc::clone(&queue),
            store.clone(),
            Arc::clone(&index),
            Arc::clone(&cache),
            Arc::clone(&metrics),
            settings,
        ));

        Fixture { store, queue, index, cache, metrics, worker }
    }

    #[test]
    fn test_rebuild_after_threshold_clears_cache() {
        let f = fixture(20);
        rebuild_index(f.store.as_ref(), &f.index, &f.cache, &f.metrics).unwrap();
        assert_eq!(f.index.len(), 1);
        f.cache.insert(7, Resolution::new("E1", 0.9));

        for i in 0..20 {
            f.queue
                .push(PendingEmbeddingUpdate::new("E1", vec![1.0, i as f32 * 0.01], 0.9))
                .unwrap();
        }
        f.queue.close();
        f.worker.run();

        assert_eq!(f.metrics.index_rebuilds(), 2);
        assert_eq!(f.index.len(), 21);
        assert!(f.cache.is_empty());
        assert_eq!(f.worker.persisted_since_rebuild(), 0);
    }

    #[test]
    fn test_partial_batch_is_drained_on_close() {
        let f = fixture(20);
        for _ in 0..3 {
            f.queue.push(PendingEmbeddingUpdate::new("E1", vec![0.0, 1.0], 0.85)).unwrap();
        }
        f.queue.push(PendingEmbeddingUpdate::new("ghost", vec![0.0, 1.0], 0.99)).unwrap();

        let handle = Arc::clone(&f.worker).spawn().unwrap();
        thread::sleep(Duration::from_millis(100));
        f.queue.close();
        handle.join().unwrap();

        assert_eq!(f.worker.persisted_since_rebuild(), 3);
        assert_eq!(f.store.embedding_count(1, EmbeddingKind::Update), 3);
        assert_eq!(f.metrics.index_rebuilds(), 0);
    }

    #[test]
    fn test_idle_worker_keeps_consuming_until_closed() {
        let f = fixture(20);
        let handle = Arc::clone(&f.worker).spawn().unwrap();

        // Several idle polls pass before the late updates arrive.
        thread::sleep(Duration::from_millis(150));
        assert!(!handle.is_finished());
        for _ in 0..2 {
            f.queue.push(PendingEmbeddingUpdate::new("E1", vec![0.0, 1.0], 0.9)).unwrap();
        }
        f.queue.close();
        handle.join().unwrap();

        assert_eq!(f.store.embedding_count(1, EmbeddingKind::Update), 2);
    }

    #[test]
    fn test_empty_store_skips_rebuild() {
        let store = MemoryStore::new();
        let index = IdentityIndex::default();
        let metrics = Metrics::new().unwrap();
        let size = rebuild_index(&store, &index, &ResolutionCache::new(4), &metrics).unwrap();
        assert_eq!(size, 0);
        assert_eq!(metrics.index_rebuilds(), 0);
    }
}
