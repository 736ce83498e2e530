use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::enhance::{prepare_for_detection, EnhanceSettings};
use super::{DetectedFace, DetectionResult, DetectorFactory, FaceDetector};
use crate::camera::CameraFrame;
use crate::config::{PipelineConfig, TuningSettings};
use crate::error::{Result, TrackerError};
use crate::recognition::quality::QualityGate;
use crate::utils::{metrics::Metrics, pool::ResourcePools, shutdown::ShutdownSignal};

const DRAIN_POLL: Duration = Duration::from_secs(1);

/// Worker pool and detector instance bound to one GPU.
struct GpuWorkers {
    gpu_id: u32,
    pool: ThreadPool,
    detector: Arc<dyn FaceDetector>,
    /// Jobs handed to the pool and not yet finished, including ones whose
    /// caller already gave up waiting.
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

impl GpuWorkers {
    fn try_acquire(&self) -> Option<JobPermit> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_in_flight).then_some(n + 1)
            })
            .ok()
            .map(|_| JobPermit(Arc::clone(&self.in_flight)))
    }
}

/// Slot in a GPU's job budget, returned when the job finishes.
struct JobPermit(Arc<AtomicUsize>);

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-GPU detection worker pools shared by every camera assigned to that
/// GPU. Each attached camera gets a drain thread that pulls its frame
/// queue, runs enhancement and detection on the GPU's pool under a timeout
/// and pushes quality-filtered results to the camera's result queue.
pub struct DetectionPipeline {
    workers: Mutex<HashMap<u32, Arc<GpuWorkers>>>,
    enhance: EnhanceSettings,
    detector_timeout: Duration,
    gate: QualityGate,
    pools: Arc<ResourcePools>,
    metrics: Arc<Metrics>,
    shutdown: ShutdownSignal,
}

impl DetectionPipeline {
    pub fn new(
        gpu_ids: impl IntoIterator<Item = u32>,
        factory: &dyn DetectorFactory,
        config: &PipelineConfig,
        tuning: &TuningSettings,
        pools: Arc<ResourcePools>,
        metrics: Arc<Metrics>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let mut workers = HashMap::new();
        for gpu_id in gpu_ids {
            if workers.contains_key(&gpu_id) {
                continue;
            }
            let detector = factory.create(gpu_id, tuning.detection_threshold)?;
            let threads = config.detection_workers_per_gpu.max(1);
            let pool = ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(move |i| format!("detection-gpu{}-{}", gpu_id, i))
                .panic_handler(move |_| error!(gpu_id, "Detection worker panicked"))
                .build()
                .map_err(|e| {
                    TrackerError::InferenceError(format!("Failed to build worker pool for GPU {}: {}", gpu_id, e))
                })?;

            info!(gpu_id, threads = config.detection_workers_per_gpu, "Detection worker pool ready");
            workers.insert(
                gpu_id,
                Arc::new(GpuWorkers {
                    gpu_id,
                    pool,
                    detector,
                    in_flight: Arc::new(AtomicUsize::new(0)),
                    max_in_flight: threads,
                }),
            );
        }

        Ok(Self {
            workers: Mutex::new(workers),
            enhance: EnhanceSettings::from(config),
            detector_timeout: config.detector_timeout(),
            gate: QualityGate::new(tuning.face_quality_threshold),
            pools,
            metrics,
            shutdown,
        })
    }

    /// Spawns the drain thread for one camera. The thread exits when the
    /// global shutdown fires or either end of its queues disconnects.
    pub fn attach(
        self: &Arc<Self>,
        camera_id: u32,
        gpu_id: u32,
        frames: Receiver<CameraFrame>,
        results: Sender<DetectionResult>,
    ) -> Result<JoinHandle<()>> {
        let workers = self.workers.lock().get(&gpu_id).cloned().ok_or_else(|| {
            TrackerError::InferenceError(format!("No detection workers for GPU {}", gpu_id))
        })?;

        let pipeline = Arc::clone(self);
        thread::Builder::new()
            .name(format!("detection-drain-{}", camera_id))
            .spawn(move || pipeline.drain(camera_id, workers, frames, results))
            .map_err(TrackerError::from)
    }

    fn drain(
        &self,
        camera_id: u32,
        workers: Arc<GpuWorkers>,
        frames: Receiver<CameraFrame>,
        results: Sender<DetectionResult>,
    ) {
        debug!(camera_id, gpu_id = workers.gpu_id, "Detection drain started");

        while !self.shutdown.is_triggered() {
            let frame = match frames.recv_timeout(DRAIN_POLL) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let outcome = self.detect_frame(&workers, &frame);
            self.pools.release_frame(frame.image);

            let Some(result) = outcome else { continue };
            match results.try_send(result) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => self.metrics.record_frame_dropped(camera_id, "result"),
                Err(TrySendError::Disconnected(_)) => break,
            }
        }

        debug!(camera_id, "Detection drain stopped");
    }

    #[instrument(level = "debug", skip_all, fields(camera_id = frame.camera_id, seq = frame.sequence_num))]
    fn detect_frame(&self, workers: &GpuWorkers, frame: &CameraFrame) -> Option<DetectionResult> {
        // Jobs that outlived their timeout still occupy workers.
        let Some(permit) = workers.try_acquire() else {
            debug!(camera_id = frame.camera_id, gpu_id = workers.gpu_id, "Detection workers busy, skipping frame");
            self.metrics.record_frame_dropped(frame.camera_id, "detector");
            return None;
        };

        let started = Instant::now();
        let (prepared, scale) = prepare_for_detection(frame, &self.enhance);

        let faces = match self.run_detector(workers, prepared, permit) {
            Ok(faces) => faces,
            Err(TrackerError::Timeout(msg)) => {
                error!(camera_id = frame.camera_id, "Detection timed out: {}", msg);
                self.metrics.record_detection_failure(frame.camera_id, "timeout");
                return None;
            }
            Err(e) => {
                error!(camera_id = frame.camera_id, "Detection failed: {}", e);
                self.metrics.record_detection_failure(frame.camera_id, "error");
                return None;
            }
        };
        self.metrics.observe_detection_latency(started.elapsed());

        let detected = faces.len();
        let accepted: Vec<DetectedFace> = faces
            .into_iter()
            .map(|mut face| {
                face.bbox = face.bbox.unscale(scale);
                face
            })
            .filter(|face| self.gate.accepts(face, frame.width(), frame.height()))
            .collect();
        self.metrics.record_quality_gate(accepted.len(), detected - accepted.len());

        Some(DetectionResult {
            camera_id: frame.camera_id,
            sequence_num: frame.sequence_num,
            timestamp_ms: frame.timestamp_ms,
            frame_width: frame.width(),
            frame_height: frame.height(),
            faces: accepted,
        })
    }

    fn run_detector(&self, workers: &GpuWorkers, frame: CameraFrame, permit: JobPermit) -> Result<Vec<DetectedFace>> {
        let (tx, rx) = bounded(1);
        let detector = Arc::clone(&workers.detector);
        workers.pool.spawn(move || {
            let _permit = permit;
            let _ = tx.send(detector.detect(&frame));
        });

        match rx.recv_timeout(self.detector_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TrackerError::Timeout(format!(
                "detector exceeded {:?}",
                self.detector_timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(TrackerError::InferenceError(
                "detector worker exited without a result".to_string(),
            )),
        }
    }

    pub fn gpu_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Releases the worker pools. Drain threads still holding a pool keep it
    /// alive until they observe the shutdown signal.
    pub fn shutdown(&self) {
        let released = self.workers.lock().drain().count();
        if released > 0 {
            info!(pools = released, "Detection worker pools released");
        } else {
            warn!("Detection pipeline already shut down");
        }
    }
}
