use facegate_common::{AttendanceEvent, CameraConfig, TrackingSnapshot, WorkStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{PipelineConfig, TuningSettings};
use crate::inference::{DetectedFace, DetectionResult};
use crate::maintenance::{PendingEmbeddingUpdate, PushError, UpdateQueue};
use crate::messaging::EventNotifier;
use crate::recognition::index::normalized;
use crate::recognition::{
    IdentityIndex, IdentityRegistry, IdentityResolver, ResolutionCache, TemporalVoter, UNKNOWN_IDENTITY,
};
use crate::tracking::{Crossing, PositionSmoother, StatusRuleTable, TripwireMonitor};
use crate::utils::{metrics::Metrics, pool::ResourcePools};

/// Shared state every capture loop feeds its detection results through:
/// identity resolution, smoothing, tripwire crossings and the resulting
/// attendance events, plus hand-off of confident embeddings.
pub struct FrameProcessor {
    resolver: IdentityResolver,
    voter: TemporalVoter,
    registry: IdentityRegistry,
    smoother: PositionSmoother,
    tripwires: TripwireMonitor,
    rules: StatusRuleTable,
    notifier: EventNotifier,
    updates: Arc<UpdateQueue>,
    tuning: Arc<TuningSettings>,
    confident_update_score: f32,
    identity_timeout: Duration,
    eviction_interval: Duration,
    last_eviction: Mutex<Instant>,
}

impl FrameProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &PipelineConfig,
        tuning: Arc<TuningSettings>,
        rules: StatusRuleTable,
        index: Arc<IdentityIndex>,
        cache: Arc<ResolutionCache>,
        pools: Arc<ResourcePools>,
        updates: Arc<UpdateQueue>,
        notifier: EventNotifier,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(
                index,
                cache,
                pools,
                metrics,
                tuning.recognition_threshold,
                config.search_top_k,
            ),
            voter: TemporalVoter::new(config.vote_window, config.vote_min_votes, config.vote_reset()),
            registry: IdentityRegistry::new(config.embedding_history_size),
            smoother: PositionSmoother::new(tuning.kalman_process_noise, tuning.kalman_measurement_noise),
            tripwires: TripwireMonitor::new(),
            rules,
            notifier,
            updates,
            tuning,
            confident_update_score: config.confident_update_score,
            identity_timeout: config.identity_timeout(),
            eviction_interval: config.eviction_interval(),
            last_eviction: Mutex::new(Instant::now()),
        }
    }

    /// Runs one detection result through the tracking stages and returns the
    /// display snapshot for it.
    #[instrument(level = "debug", skip_all, fields(camera_id = camera.id, seq = result.sequence_num))]
    pub fn process(&self, camera: &CameraConfig, result: &DetectionResult) -> TrackingSnapshot {
        let now = Instant::now();
        let mut snapshot = TrackingSnapshot::default();

        for face in &result.faces {
            self.process_face(camera, result, face, now, &mut snapshot);
        }

        self.maybe_evict(now);
        snapshot
    }

    fn process_face(
        &self,
        camera: &CameraConfig,
        result: &DetectionResult,
        face: &DetectedFace,
        now: Instant,
        snapshot: &mut TrackingSnapshot,
    ) {
        let resolution = self.resolver.resolve(&face.embedding);
        if resolution.is_unknown() {
            snapshot.push(UNKNOWN_IDENTITY, resolution.score, face.bbox);
            return;
        }

        let resolution = self.voter.vote(camera.id, &resolution, now);
        snapshot.push(&resolution.identity, resolution.score, face.bbox);

        let identity = resolution.identity.as_str();
        let score = resolution.score;
        let threshold = self
            .registry
            .adaptive_threshold(identity, self.tuning.recognition_threshold);
        if score < threshold {
            debug!(identity, score, threshold, "Below adaptive threshold");
            return;
        }

        let position = self.smoother.smooth(identity, face.bbox.center());
        let embedding = normalized(&face.embedding);
        self.registry
            .record_sighting(identity, camera.id, score, &embedding, now);

        for crossing in self.tripwires.observe(
            identity,
            camera,
            result.frame_width,
            result.frame_height,
            position,
        ) {
            self.handle_crossing(crossing);
        }

        if score > self.confident_update_score
            && self
                .registry
                .try_claim_update(identity, self.tuning.embedding_update_cooldown, now)
        {
            match self
                .updates
                .push(PendingEmbeddingUpdate::new(identity, embedding, score))
            {
                Ok(()) => debug!(identity, score, "Queued embedding update"),
                Err(PushError::Full(_)) => debug!(identity, "Embedding update queue full, update dropped"),
                Err(PushError::Closed(_)) => {}
            }
        }
    }

    fn handle_crossing(&self, crossing: Crossing) {
        let Some(transition) = self.rules.lookup(crossing.camera_id, crossing.direction) else {
            warn!(
                identity = %crossing.identity,
                camera_id = crossing.camera_id,
                direction = %crossing.direction,
                "No status rule for crossing, ignoring"
            );
            return;
        };

        self.registry
            .set_work_status(&crossing.identity, transition.work_status());
        info!(
            identity = %crossing.identity,
            camera_id = crossing.camera_id,
            tripwire = %crossing.tripwire,
            direction = %crossing.direction,
            "Tripwire crossed"
        );

        let event = AttendanceEvent::new(
            &crossing.identity,
            crossing.camera_id,
            &crossing.tripwire,
            transition.event_type(),
        );
        if let Err(e) = self.notifier.notify(event) {
            error!(identity = %crossing.identity, "Failed to record attendance event: {}", e);
        }
    }

    fn maybe_evict(&self, now: Instant) {
        {
            let mut last = self.last_eviction.lock();
            if now.saturating_duration_since(*last) < self.eviction_interval {
                return;
            }
            *last = now;
        }
        self.evict_idle(now);
    }

    /// Drops identities idle past the timeout together with their filters,
    /// vote windows and crossing states.
    pub fn evict_idle(&self, now: Instant) -> Vec<String> {
        let expired = self.registry.evict_expired(self.identity_timeout, now);
        for identity in &expired {
            self.smoother.remove(identity);
            self.voter.forget(identity);
            self.tripwires.forget(identity);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Evicted idle identities");
        }
        expired
    }

    pub fn work_status(&self, identity: &str) -> Option<WorkStatus> {
        self.registry.work_status(identity)
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn tracked_positions(&self) -> usize {
        self.smoother.len()
    }

    pub fn crossing_states(&self) -> usize {
        self.tripwires.len()
    }
}
