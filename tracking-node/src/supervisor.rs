use crossbeam::channel::bounded;
use facegate_common::utils::validate_source;
use facegate_common::{CameraConfig, CameraStatus, TrackingSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use validator::Validate;

use crate::camera::capture::{CameraSlots, CaptureContext, CaptureLoop};
use crate::camera::{CameraFrame, FrameSource};
use crate::config::{PipelineConfig, TrackerConfig, TuningSettings};
use crate::error::{Result, TrackerError};
use crate::inference::pipeline::DetectionPipeline;
use crate::inference::DetectorFactory;
use crate::maintenance::{rebuild_index, EmbeddingMaintenanceWorker, MaintenanceSettings, UpdateQueue};
use crate::messaging::{AttendanceSink, EventNotifier};
use crate::processing::FrameProcessor;
use crate::recognition::{IdentityIndex, ResolutionCache};
use crate::storage::Store;
use crate::utils::metrics::Metrics;
use crate::utils::pool::ResourcePools;
use crate::utils::shutdown::{join_with_timeout, ShutdownSignal};

/// External capabilities the tracker is wired to.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub frame_source: Arc<dyn FrameSource>,
    pub detectors: Arc<dyn DetectorFactory>,
    /// Optional forwarding of attendance events, run on the given runtime.
    pub attendance: Option<(Arc<dyn AttendanceSink>, Handle)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerStatus {
    pub running: bool,
    pub cameras: BTreeMap<u32, CameraStatus>,
}

struct RunningCamera {
    shutdown: ShutdownSignal,
    capture: JoinHandle<()>,
    drain: JoinHandle<()>,
}

/// Owns every engine component and controls the per-camera loops.
pub struct TrackerSupervisor {
    pipeline_config: PipelineConfig,
    cameras: BTreeMap<u32, CameraConfig>,
    slots: HashMap<u32, Arc<CameraSlots>>,
    running: Mutex<BTreeMap<u32, RunningCamera>>,
    capture: Arc<CaptureContext>,
    pipeline: Arc<DetectionPipeline>,
    updates: Arc<UpdateQueue>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    index: Arc<IdentityIndex>,
    tuning: Arc<TuningSettings>,
    metrics: Arc<Metrics>,
    shutdown: ShutdownSignal,
    stopped: AtomicBool,
}

impl TrackerSupervisor {
    /// Loads cameras and tuning settings from the store, builds the initial
    /// identity index and starts the detection pools and the maintenance
    /// worker. Cameras are not started. Fails when the store has no usable
    /// camera or no tuning settings.
    pub fn new(config: TrackerConfig, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            store,
            frame_source,
            detectors,
            attendance,
        } = collaborators;
        let p = &config.pipeline;

        let cameras = load_cameras(store.as_ref())?;
        let tuning = Arc::new(TuningSettings::from_settings(&store.system_settings()?)?);
        info!(node_id = %config.node_id, cameras = cameras.len(), "Starting tracker");

        let metrics = Arc::new(Metrics::new()?);
        let pools = Arc::new(ResourcePools::new(
            p.frame_pool_capacity,
            p.embedding_pool_capacity,
            p.embedding_dim,
        ));
        let index = Arc::new(IdentityIndex::default());
        let cache = Arc::new(ResolutionCache::new(p.cache_capacity));
        rebuild_index(store.as_ref(), &index, &cache, &metrics)?;

        let shutdown = ShutdownSignal::new();
        let pipeline = Arc::new(DetectionPipeline::new(
            cameras.values().map(|c| c.gpu_id),
            detectors.as_ref(),
            p,
            &tuning,
            Arc::clone(&pools),
            Arc::clone(&metrics),
            shutdown.clone(),
        )?);

        let updates = Arc::new(UpdateQueue::new(p.update_queue_capacity));
        let notifier = EventNotifier::new(Arc::clone(&store), attendance, Arc::clone(&metrics));
        let processor = Arc::new(FrameProcessor::new(
            p,
            Arc::clone(&tuning),
            config.status_rules.clone(),
            Arc::clone(&index),
            Arc::clone(&cache),
            Arc::clone(&pools),
            Arc::clone(&updates),
            notifier,
            Arc::clone(&metrics),
        ));

        let worker = Arc::new(EmbeddingMaintenanceWorker::new(
            Arc::clone(&updates),
            store,
            Arc::clone(&index),
            cache,
            Arc::clone(&metrics),
            MaintenanceSettings::new(p, &tuning),
        ));
        let maintenance = worker.spawn()?;

        let capture = Arc::new(CaptureContext {
            source: frame_source,
            processor,
            pools,
            metrics: Arc::clone(&metrics),
            frame_interval: p.frame_interval(),
            reconnect_delay: p.reconnect_delay(),
        });
        let slots = cameras
            .keys()
            .map(|id| (*id, Arc::new(CameraSlots::new())))
            .collect();

        Ok(Self {
            pipeline_config: config.pipeline,
            cameras,
            slots,
            running: Mutex::new(BTreeMap::new()),
            capture,
            pipeline,
            updates,
            maintenance: Mutex::new(Some(maintenance)),
            index,
            tuning,
            metrics,
            shutdown,
            stopped: AtomicBool::new(false),
        })
    }

    /// Returns false if the camera is unknown, already running or the
    /// tracker has shut down.
    pub fn start_camera(&self, camera_id: u32) -> bool {
        let mut running = self.running.lock();
        self.start_locked(&mut running, camera_id)
    }

    /// Returns false if the camera was not running.
    pub fn stop_camera(&self, camera_id: u32) -> bool {
        let mut running = self.running.lock();
        self.stop_locked(&mut running, camera_id)
    }

    /// Starts every stopped camera and returns how many were started.
    pub fn start_all(&self) -> usize {
        let mut running = self.running.lock();
        self.cameras
            .keys()
            .filter(|id| self.start_locked(&mut running, **id))
            .count()
    }

    /// Stops every running camera and returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let mut running = self.running.lock();
        let ids: Vec<u32> = running.keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.stop_locked(&mut running, *id))
            .count()
    }

    fn start_locked(&self, running: &mut BTreeMap<u32, RunningCamera>, camera_id: u32) -> bool {
        if self.shutdown.is_triggered() || running.contains_key(&camera_id) {
            return false;
        }
        let (Some(camera), Some(slots)) = (self.cameras.get(&camera_id), self.slots.get(&camera_id)) else {
            warn!(camera_id, "Cannot start unknown camera");
            return false;
        };

        let (frame_tx, frame_rx) = bounded(self.pipeline_config.frame_queue_capacity);
        let (result_tx, result_rx) = bounded(self.pipeline_config.result_queue_capacity);

        let drain = match self.pipeline.attach(camera_id, camera.gpu_id, frame_rx, result_tx) {
            Ok(handle) => handle,
            Err(e) => {
                error!(camera_id, "Failed to attach camera to detection pipeline: {}", e);
                return false;
            }
        };

        let shutdown = ShutdownSignal::new();
        let capture = CaptureLoop::new(
            camera.clone(),
            Arc::clone(&self.capture),
            Arc::clone(slots),
            frame_tx,
            result_rx,
            shutdown.clone(),
        );
        let capture = match capture.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                error!(camera_id, "Failed to spawn capture loop: {}", e);
                return false;
            }
        };

        running.insert(camera_id, RunningCamera { shutdown, capture, drain });
        info!(camera_id, name = %camera.name, gpu_id = camera.gpu_id, "Camera started");
        true
    }

    fn stop_locked(&self, running: &mut BTreeMap<u32, RunningCamera>, camera_id: u32) -> bool {
        let Some(camera) = running.remove(&camera_id) else {
            return false;
        };

        camera.shutdown.trigger();
        let timeout = self.pipeline_config.camera_join_timeout();
        join_with_timeout(&format!("capture-{}", camera_id), camera.capture, timeout);
        join_with_timeout(&format!("detection-drain-{}", camera_id), camera.drain, timeout);

        info!(camera_id, "Camera stopped");
        true
    }

    pub fn status(&self) -> TrackerStatus {
        let running = self.running.lock();
        let cameras = self
            .cameras
            .keys()
            .map(|id| {
                let status = if running.contains_key(id) {
                    CameraStatus::Running
                } else {
                    CameraStatus::Stopped
                };
                (*id, status)
            })
            .collect();

        TrackerStatus {
            running: !running.is_empty(),
            cameras,
        }
    }

    /// Stops all cameras, drains the maintenance worker and releases the
    /// detection pools. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down tracker");

        self.shutdown.trigger();
        self.stop_all();

        self.updates.close();
        if let Some(handle) = self.maintenance.lock().take() {
            join_with_timeout(
                "embedding-maintenance",
                handle,
                self.pipeline_config.worker_join_timeout(),
            );
        }
        self.pipeline.shutdown();

        info!("Tracker shut down");
    }

    pub fn latest_raw_frame(&self, camera_id: u32) -> Option<Arc<CameraFrame>> {
        self.slots.get(&camera_id)?.latest_frame()
    }

    pub fn latest_tracking_snapshot(&self, camera_id: u32) -> Option<TrackingSnapshot> {
        self.slots.get(&camera_id)?.latest_snapshot()
    }

    pub fn camera_config(&self, camera_id: u32) -> Option<CameraConfig> {
        self.cameras.get(&camera_id).cloned()
    }

    pub fn camera_ids(&self) -> Vec<u32> {
        self.cameras.keys().copied().collect()
    }

    pub fn tuning(&self) -> &TuningSettings {
        &self.tuning
    }

    pub fn index_size(&self) -> usize {
        self.index.len()
    }

    pub fn metrics_text(&self) -> Result<String> {
        self.metrics.encode()
    }
}

impl Drop for TrackerSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reads the enabled cameras, skipping any whose configuration is invalid.
fn load_cameras(store: &dyn Store) -> Result<BTreeMap<u32, CameraConfig>> {
    let configured = store.camera_configs()?;
    if configured.is_empty() {
        return Err(TrackerError::StartupError("no active cameras configured".to_string()));
    }

    let mut cameras = BTreeMap::new();
    for camera in configured {
        if let Err(e) = camera.validate() {
            error!(camera_id = camera.id, "Invalid camera configuration, skipping: {}", e);
            continue;
        }
        if let Err(e) = validate_source(&camera.source) {
            error!(camera_id = camera.id, "Invalid video source, skipping: {}", e);
            continue;
        }
        cameras.insert(camera.id, camera);
    }

    if cameras.is_empty() {
        return Err(TrackerError::StartupError("no valid cameras configured".to_string()));
    }
    Ok(cameras)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::FrameStream;
    use crate::config::SettingValue;
    use crate::inference::{DetectedFace, FaceDetector};
    use crate::storage::MemoryStore;
    use facegate_common::{Tripwire, TripwireOrientation};
    use image::RgbImage;
    use std::time::Duration;

    struct StillSource;

    impl FrameSource for StillSource {
        fn open(&self, camera_id: u32, _descriptor: &str) -> Result<Box<dyn FrameStream>> {
            Ok(Box::new(StillStream { camera_id, sequence_num: 0 }))
        }
    }

    struct StillStream {
        camera_id: u32,
        sequence_num: u64,
    }

    impl FrameStream for StillStream {
        fn read(&mut self) -> Option<CameraFrame> {
            self.sequence_num += 1;
            Some(CameraFrame {
                camera_id: self.camera_id,
                image: RgbImage::new(64, 48),
                timestamp_ms: self.sequence_num * 100,
                sequence_num: self.sequence_num,
            })
        }
    }

    struct NoFaces;

    impl FaceDetector for NoFaces {
        fn detect(&self, _frame: &CameraFrame) -> Result<Vec<DetectedFace>> {
            Ok(Vec::new())
        }
    }

    struct NoFacesFactory;

    impl DetectorFactory for NoFacesFactory {
        fn create(&self, _gpu_id: u32, _threshold: f32) -> Result<Arc<dyn FaceDetector>> {
            Ok(Arc::new(NoFaces))
        }
    }

    fn camera(id: u32, source: &str) -> CameraConfig {
        CameraConfig {
            id,
            name: format!("cam-{}", id),
            source: source.to_string(),
            width: 64,
            height: 48,
            fps: 10,
            gpu_id: 0,
            enabled: true,
            tripwires: vec![Tripwire {
                name: "Entrance".to_string(),
                direction: TripwireOrientation::Vertical,
                position: 0.5,
                spacing: 0.1,
            }],
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_camera(camera(0, "sim://lobby")).unwrap();
        store.add_camera(camera(1, "sim://yard")).unwrap();
        store.set_setting("recognition_threshold", SettingValue::Float(0.6));
        store
    }

    fn test_config() -> TrackerConfig {
        let mut config = TrackerConfig::default();
        config.pipeline.frame_interval_ms = 10;
        config.pipeline.update_poll_ms = 20;
        config.pipeline.detection_workers_per_gpu = 1;
        config
    }

    fn supervisor(store: Arc<MemoryStore>) -> Result<TrackerSupervisor> {
        TrackerSupervisor::new(
            test_config(),
            Collaborators {
                store,
                frame_source: Arc::new(StillSource),
                detectors: Arc::new(NoFacesFactory),
                attendance: None,
            },
        )
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let tracker = supervisor(seeded_store()).unwrap();

        assert!(tracker.start_camera(0));
        assert!(!tracker.start_camera(0));
        assert_eq!(tracker.status().cameras[&0], CameraStatus::Running);
        assert_eq!(tracker.status().cameras[&1], CameraStatus::Stopped);
        assert!(tracker.status().running);

        assert!(tracker.stop_camera(0));
        assert!(!tracker.stop_camera(0));
        assert!(!tracker.status().running);
        assert!(!tracker.start_camera(9));

        let status = serde_json::to_value(tracker.status()).unwrap();
        assert_eq!(
            status,
            serde_json::json!({"running": false, "cameras": {"0": "stopped", "1": "stopped"}})
        );
    }

    #[test]
    fn test_start_all_then_shutdown() {
        let tracker = supervisor(seeded_store()).unwrap();
        assert_eq!(tracker.start_all(), 2);
        assert_eq!(tracker.start_all(), 0);

        std::thread::sleep(Duration::from_millis(150));
        assert!(tracker.latest_raw_frame(0).is_some());
        assert!(tracker.latest_tracking_snapshot(1).is_some());
        assert!(tracker.latest_raw_frame(7).is_none());

        tracker.shutdown();
        tracker.shutdown();
        assert!(!tracker.status().running);
        assert!(!tracker.start_camera(0));
        assert!(tracker.metrics_text().unwrap().contains("facegate_frames_captured_total"));
    }

    #[test]
    fn test_missing_cameras_are_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.set_setting("recognition_threshold", SettingValue::Float(0.6));
        assert!(matches!(supervisor(store), Err(TrackerError::StartupError(_))));
    }

    #[test]
    fn test_missing_settings_are_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.add_camera(camera(0, "0")).unwrap();
        assert!(matches!(supervisor(store), Err(TrackerError::StartupError(_))));
    }

    #[test]
    fn test_invalid_source_is_skipped() {
        let store = seeded_store();
        store.add_camera(camera(2, "ftp://nowhere/feed")).unwrap();
        let tracker = supervisor(store).unwrap();

        assert_eq!(tracker.camera_ids(), vec![0, 1]);
        assert!(tracker.camera_config(2).is_none());
        assert_eq!(tracker.camera_config(0).map(|c| c.tripwires.len()), Some(1));
        assert_eq!(tracker.index_size(), 0);
    }
}
